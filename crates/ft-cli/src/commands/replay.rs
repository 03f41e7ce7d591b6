//! Replay a recorded message log through a session.
//!
//! The log is JSON lines, one [`InboundMessage`] per line. Replay runs on a
//! virtual clock: ticks fire at the message timestamps rather than the wall
//! clock, so a recording replays with the same results every time.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use ft_core::{InboundMessage, ProfileStore, SessionConfig, SessionId, SessionState};
use ft_session::{SessionError, SessionOrchestrator, SessionOutcome};
use tracing::{debug, warn};

use super::{open_database, render, save_outcome};
use crate::Config;

/// A replayed session plus what happened to its input.
#[derive(Debug)]
pub struct Replay {
    pub outcome: SessionOutcome,
    /// Lines that parsed as messages.
    pub messages: usize,
    /// Lines that were not valid messages.
    pub unparsed: usize,
    /// Messages the session refused (bad ids, unknown profiles, full queue).
    pub rejected: usize,
}

/// Feeds every message in `reader` to a fresh session and ends it after the
/// last one.
pub fn replay<R: BufRead>(
    reader: R,
    config: &SessionConfig,
    profiles: Arc<dyn ProfileStore>,
    session_id: SessionId,
) -> Result<Replay> {
    let mut orchestrator = SessionOrchestrator::new(session_id, config.clone(), profiles);
    let ingestor = orchestrator.ingestor();
    let interval = config.tick_interval();

    let mut next_tick = None;
    let mut messages = 0;
    let mut unparsed = 0;
    let mut rejected = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read message log")?;
        if line.trim().is_empty() {
            continue;
        }
        let message: InboundMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping unparseable line");
                unparsed += 1;
                continue;
            }
        };
        messages += 1;

        let timestamp = message.timestamp();
        let mut tick_at = *next_tick.get_or_insert(timestamp + interval);
        while timestamp >= tick_at && orchestrator.state() != SessionState::Ended {
            rejected += orchestrator.tick(tick_at)?.rejected;
            tick_at += interval;
            if orchestrator.state() == SessionState::Idle && timestamp >= tick_at {
                tick_at = skip_idle(tick_at, timestamp, interval);
            }
        }
        next_tick = Some(tick_at);

        if orchestrator.state() == SessionState::Ended {
            debug!(line = index + 1, "session ended, ignoring the rest of the log");
            break;
        }

        match ingestor.send(message) {
            Ok(()) => {}
            Err(err @ SessionError::QueueFull { .. }) => {
                warn!(line = index + 1, error = %err, "message dropped");
                rejected += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let end = match next_tick {
        Some(end) => {
            if orchestrator.state() != SessionState::Ended {
                rejected += orchestrator.tick(end)?.rejected;
            }
            end
        }
        None => Utc::now(),
    };
    let summary = orchestrator.stop(end);
    let timeline = orchestrator.timeline_export();

    Ok(Replay {
        outcome: SessionOutcome { summary, timeline },
        messages,
        unparsed,
        rejected,
    })
}

/// The first tick boundary after `timestamp`.
///
/// Nobody is tracked while the session is idle and the queue is already
/// drained, so the ticks in between would record nothing.
fn skip_idle(tick_at: DateTime<Utc>, timestamp: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds().max(1);
    let behind = (timestamp - tick_at).num_milliseconds() / step;
    debug!(skipped = behind + 1, "skipping idle ticks");
    tick_at + Duration::milliseconds((behind + 1) * step)
}

/// Replays `path` and prints the summary.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    path: &Path,
    json: bool,
    save: bool,
) -> Result<()> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let replayed = replay(
        BufReader::new(file),
        &config.session,
        config.profile_store(),
        SessionId::generate(),
    )?;

    if save {
        let mut db = open_database(config)?;
        save_outcome(&mut db, &replayed.outcome)?;
    }

    if json {
        writeln!(
            writer,
            "{}",
            serde_json::to_string_pretty(&replayed.outcome.summary)?
        )?;
    } else {
        render::summary(writer, &replayed.outcome.summary)?;
        writeln!(
            writer,
            "Replayed {} messages ({} unparsed, {} rejected)",
            replayed.messages, replayed.unparsed, replayed.rejected
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use ft_core::{EntityStatus, Profile, ProfileId, StaticProfiles, ZoneBand, ZoneId, ZoneProfile};
    use insta::assert_snapshot;

    fn zones() -> ZoneProfile {
        let band = |id: &str, min_bpm: f64| ZoneBand {
            zone_id: ZoneId::new(id).unwrap(),
            min_bpm,
            max_bpm: None,
        };
        ZoneProfile::new(
            vec![
                band("cool", 60.0),
                band("active", 100.0),
                band("warm", 120.0),
                band("hot", 140.0),
                band("fire", 170.0),
            ],
            BTreeMap::new(),
        )
    }

    fn profiles() -> Arc<dyn ProfileStore> {
        let profile = |id: &str, name: &str| Profile {
            id: ProfileId::new(id).unwrap(),
            display_name: name.to_string(),
            zones: Some(zones()),
        };
        Arc::new(StaticProfiles::new([
            profile("alan", "Alan"),
            profile("bob", "Bob"),
        ]))
    }

    const HANDOVER_LOG: &str = r#"
{"type":"assign","deviceId":"d1","profileId":"alan","timestamp":"2025-01-15T09:00:00Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:00Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:15Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:30Z"}
{"type":"assign","deviceId":"d1","profileId":"bob","timestamp":"2025-01-15T09:00:30Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:40Z"}
"#;

    fn replay_log(log: &str) -> Replay {
        replay(
            log.as_bytes(),
            &SessionConfig::default(),
            profiles(),
            SessionId::new("replay-test").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn handover_replays_deterministically() {
        let replayed = replay_log(HANDOVER_LOG);
        assert_eq!(replayed.messages, 6);
        assert_eq!(replayed.unparsed, 0);
        assert_eq!(replayed.rejected, 0);

        let summary = &replayed.outcome.summary;
        assert_eq!(summary.tick_count, 41);
        assert_eq!(summary.entities.len(), 2);
        assert_eq!(summary.entities[0].status, EntityStatus::Transferred);
        assert_eq!(
            summary.entities[0].transferred_to,
            Some(summary.entities[1].entity_id.clone())
        );
        assert_eq!(summary.entities[1].entity_id.as_str(), "ent-0002");
        assert!((summary.total_coins() - 8.2).abs() < 1e-9);

        assert_eq!(replay_log(HANDOVER_LOG).outcome, replayed.outcome);
    }

    #[test]
    fn handover_summary_renders() {
        let replayed = replay_log(HANDOVER_LOG);
        let mut output = Vec::new();
        render::summary(&mut output, &replayed.outcome.summary).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Session replay-test
        Started: 2025-01-15 09:00:00 UTC
        Ended:   2025-01-15 09:00:41 UTC
        Ticks:   41

        ENTITY     PROFILE    DEVICE   STATUS         COINS   TIME
        ent-0001   alan       d1       transferred     6.00   0:30  (to ent-0002)
        ent-0002   bob        d1       dropped         8.20   0:41

        Total coins: 8.20
        ");
    }

    #[test]
    fn bad_lines_are_counted_not_fatal() {
        let log = r#"
not json
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:00Z"}
{"type":"assign","deviceId":"d1","profileId":"  ","timestamp":"2025-01-15T09:00:01Z"}
{"type":"sample","deviceId":"","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:02Z"}
"#;
        let replayed = replay_log(log);
        assert_eq!(replayed.messages, 3);
        assert_eq!(replayed.unparsed, 1);
        assert_eq!(replayed.rejected, 2);
        assert!(replayed.outcome.summary.entities.is_empty());
        assert_eq!(replayed.outcome.summary.start_time, None);
    }

    #[test]
    fn long_silence_ends_the_session() {
        let log = r#"
{"type":"assign","deviceId":"d1","profileId":"alan","timestamp":"2025-01-15T09:00:00Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:00Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T10:00:00Z"}
"#;
        let replayed = replay_log(log);
        let summary = &replayed.outcome.summary;
        assert_eq!(
            summary.end_time.to_rfc3339(),
            "2025-01-15T09:05:00+00:00"
        );
        assert_eq!(summary.entities[0].status, EntityStatus::Dropped);
    }

    #[test]
    fn idle_gap_is_skipped() {
        let log = r#"
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:00Z"}
{"type":"sample","deviceId":"d2","metric":"heart_rate","value":150,"timestamp":"2025-01-16T09:00:00Z"}
"#;
        let replayed = replay_log(log);
        let summary = &replayed.outcome.summary;
        assert_eq!(summary.tick_count, 2);
        assert!(summary.entities.is_empty());
        assert!(
            replayed
                .outcome
                .timeline
                .iter()
                .all(|series| series.values.len() == 2)
        );
    }

    #[test]
    fn idle_gap_before_first_assignment_keeps_later_ticks() {
        let log = r#"
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T06:00:00Z"}
{"type":"assign","deviceId":"d1","profileId":"alan","timestamp":"2025-01-15T09:00:00Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:00Z"}
{"type":"sample","deviceId":"d1","metric":"heart_rate","value":150,"timestamp":"2025-01-15T09:00:30Z"}
"#;
        let replayed = replay_log(log);
        let summary = &replayed.outcome.summary;
        assert_eq!(summary.entities.len(), 1);
        assert_eq!(summary.start_time.unwrap().to_rfc3339(), "2025-01-15T09:00:00+00:00");
        assert!((summary.total_coins() - 6.2).abs() < 1e-9);
        // One idle tick, then 09:00:01 through the final tick at 09:00:31.
        assert_eq!(summary.tick_count, 32);
    }

    #[test]
    fn empty_log_produces_empty_session() {
        let replayed = replay_log("");
        assert_eq!(replayed.messages, 0);
        assert!(replayed.outcome.summary.entities.is_empty());
        assert_eq!(replayed.outcome.summary.tick_count, 0);
    }
}
