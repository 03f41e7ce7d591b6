//! Track a live session from JSON lines on stdin.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::Utc;
use ft_core::{InboundMessage, SessionId, SessionState, Snapshot};
use ft_session::{SessionError, SessionOrchestrator, SessionOutcome};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{open_database, render, save_outcome};
use crate::Config;

/// Runs a session on the wall clock until stdin closes, the session times
/// out, or the process is interrupted.
pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool, save: bool) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let orchestrator = SessionOrchestrator::new(
        SessionId::generate(),
        config.session.clone(),
        config.profile_store(),
    );
    let outcome = runtime.block_on(track(
        BufReader::new(tokio::io::stdin()),
        orchestrator,
        writer,
        json,
    ))?;

    if save {
        let mut db = open_database(config)?;
        save_outcome(&mut db, &outcome)?;
    }

    if json {
        writeln!(writer, "{}", serde_json::to_string(&outcome.summary)?)?;
    } else {
        writeln!(writer)?;
        render::summary(writer, &outcome.summary)?;
    }
    Ok(())
}

/// Feeds `input` into a running session and prints every snapshot.
///
/// Once the input is exhausted the session runs until its next tick, so
/// everything already queued is applied, and then stops.
pub async fn track<R, W>(
    input: R,
    orchestrator: SessionOrchestrator,
    writer: &mut W,
    json: bool,
) -> Result<SessionOutcome>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let session_id = orchestrator.session_id().clone();
    let handle = ft_session::spawn(orchestrator);
    let ingestor = handle.ingestor();
    let mut snapshots = handle.subscribe();
    let mut lines = input.lines();
    let mut eof = false;
    let mut eof_at = None;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut listening = true;

    info!(session_id = %session_id, "tracking live session");

    loop {
        tokio::select! {
            signal = &mut interrupted, if listening => {
                match signal {
                    Ok(()) => {
                        info!(session_id = %session_id, "interrupted, stopping session");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "cannot listen for interrupts");
                        listening = false;
                    }
                }
            }
            line = lines.next_line(), if !eof => {
                match line.context("failed to read input")? {
                    Some(line) => forward(&ingestor, &line),
                    None => {
                        debug!(session_id = %session_id, "input closed");
                        eof = true;
                        eof_at = Some(Utc::now());
                    }
                }
            }
            snapshot = snapshots.recv() => {
                match snapshot {
                    Ok(snapshot) => {
                        print_snapshot(writer, &snapshot, json)?;
                        if snapshot.state == SessionState::Ended {
                            break;
                        }
                        // A tick that started after EOF has drained every forwarded line.
                        if eof_at.is_some_and(|at| snapshot.taken_at >= at) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %session_id, skipped, "output fell behind, snapshots skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    let outcome = handle.stop().await?;
    Ok(outcome)
}

fn forward(ingestor: &ft_session::Ingestor, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    let message: InboundMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "skipping unparseable input line");
            return;
        }
    };
    match ingestor.send(message) {
        Ok(()) => {}
        Err(err @ (SessionError::QueueFull { .. } | SessionError::QueueClosed)) => {
            warn!(error = %err, "message dropped");
        }
        Err(err) => warn!(error = %err, "message rejected"),
    }
}

fn print_snapshot<W: Write>(writer: &mut W, snapshot: &Snapshot, json: bool) -> Result<()> {
    if json {
        writeln!(writer, "{}", serde_json::to_string(snapshot)?)?;
    } else {
        writeln!(writer, "{}", render::snapshot_line(snapshot))?;
    }
    writer.flush()?;
    Ok(())
}
