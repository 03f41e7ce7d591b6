//! Command implementations.

pub mod delete;
pub mod render;
pub mod replay;
pub mod run;
pub mod sessions;
pub mod show;
pub mod status;

use anyhow::{Context, Result};
use ft_db::Database;
use ft_session::SessionOutcome;

use crate::Config;

/// Opens the configured database, creating its directory if needed.
pub fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path).with_context(|| {
        format!(
            "failed to open database at {}",
            config.database_path.display()
        )
    })
}

/// Stores a finished session's summary and timeline.
pub fn save_outcome(db: &mut Database, outcome: &SessionOutcome) -> Result<()> {
    db.save_summary(&outcome.summary)
        .context("failed to save session summary")?;
    let series = db
        .save_timeline(&outcome.summary.session_id, &outcome.timeline)
        .context("failed to save session timeline")?;
    tracing::info!(
        session_id = %outcome.summary.session_id,
        entities = outcome.summary.entities.len(),
        series,
        "session saved"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use ft_core::{
        DeviceId, EntityId, EntityStatus, EntitySummary, ProfileId, SessionId, SessionSummary,
        ZoneId,
    };

    pub fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(seconds)
    }

    /// Alan hands device d1 to Bob at t=30; the session ends at t=90.
    pub fn handover_summary(session_id: &str) -> SessionSummary {
        let entity = |id: &str, profile: &str, start: i64| EntitySummary {
            entity_id: EntityId::new(id).unwrap(),
            profile_id: ProfileId::new(profile).unwrap(),
            device_id: DeviceId::new("d1").unwrap(),
            start_time: ts(start),
            end_time: None,
            status: EntityStatus::Dropped,
            coins: 0.0,
            transferred_to: None,
            zone_time_ms: BTreeMap::new(),
        };
        let alan = EntitySummary {
            end_time: Some(ts(30)),
            status: EntityStatus::Transferred,
            coins: 6.0,
            transferred_to: Some(EntityId::new("ent-0002").unwrap()),
            ..entity("ent-0001", "alan", 0)
        };
        let bob = EntitySummary {
            end_time: Some(ts(90)),
            coins: 18.0,
            zone_time_ms: [(ZoneId::new("hot").unwrap(), 90_000)].into_iter().collect(),
            ..entity("ent-0002", "bob", 0)
        };
        SessionSummary {
            session_id: SessionId::new(session_id).unwrap(),
            start_time: Some(ts(0)),
            end_time: ts(90),
            tick_count: 90,
            entities: vec![alan, bob],
        }
    }
}
