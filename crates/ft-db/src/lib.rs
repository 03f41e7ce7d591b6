//! Storage layer for fitness sessions.
//!
//! Persists session summaries, their entity records and exported timelines
//! using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2025-01-15T09:00:00.000Z`), so lexicographic ordering matches
//! chronological ordering.
//!
//! ## Timeline Storage
//!
//! Each series is one row; its values are a JSON array in which `null` marks a
//! tick without data.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use ft_core::{
    DeviceId, EntityId, EntityStatus, EntitySummary, ProfileId, SeriesExport, SeriesKey,
    SessionId, SessionSummary, ZoneId,
};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to encode or decode a JSON column.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for session {session_id}: {timestamp}")]
    TimestampParse {
        session_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value no longer parses as its domain type.
    #[error("invalid stored data for session {session_id}: {message}")]
    InvalidData { session_id: String, message: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// One row of the session listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub tick_count: u64,
    pub entity_count: usize,
    /// Coins across participants (transferred entities excluded).
    pub total_coins: f64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                start_time TEXT,
                end_time TEXT NOT NULL,
                tick_count INTEGER NOT NULL DEFAULT 0,
                entity_count INTEGER NOT NULL DEFAULT 0,
                total_coins REAL NOT NULL DEFAULT 0,
                saved_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_end ON sessions(end_time);

            -- One row per entity ever created in a session.
            -- position: creation order within the session
            -- zone_time: JSON object of zone id -> awarded milliseconds
            CREATE TABLE IF NOT EXISTS session_entities (
                session_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                profile_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL,
                coins REAL NOT NULL DEFAULT 0,
                transferred_to TEXT,
                zone_time TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (session_id, entity_id),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_session_entities_profile ON session_entities(profile_id);

            CREATE TABLE IF NOT EXISTS timeline_series (
                session_id TEXT NOT NULL,
                series_key TEXT NOT NULL,
                point_values TEXT NOT NULL,
                PRIMARY KEY (session_id, series_key),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    /// Stores a session summary and its entities, replacing any previous copy.
    pub fn save_summary(&mut self, summary: &SessionSummary) -> Result<(), DbError> {
        let session_id = summary.session_id.as_str();
        let entity_count = i64::try_from(summary.entities.len()).unwrap_or(i64::MAX);
        let tick_count = i64::try_from(summary.tick_count).unwrap_or(i64::MAX);

        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO sessions (id, start_time, end_time, tick_count, entity_count, total_coins, saved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                tick_count = excluded.tick_count,
                entity_count = excluded.entity_count,
                total_coins = excluded.total_coins,
                saved_at = excluded.saved_at
            ",
            params![
                session_id,
                summary.start_time.map(format_timestamp),
                format_timestamp(summary.end_time),
                tick_count,
                entity_count,
                summary.total_coins(),
                format_timestamp(Utc::now()),
            ],
        )?;
        tx.execute(
            "DELETE FROM session_entities WHERE session_id = ?",
            [session_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO session_entities
                (session_id, entity_id, position, profile_id, device_id, start_time, end_time, status, coins, transferred_to, zone_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for (position, entity) in summary.entities.iter().enumerate() {
                stmt.execute(params![
                    session_id,
                    entity.entity_id.as_str(),
                    i64::try_from(position).unwrap_or(i64::MAX),
                    entity.profile_id.as_str(),
                    entity.device_id.as_str(),
                    format_timestamp(entity.start_time),
                    entity.end_time.map(format_timestamp),
                    entity.status.as_str(),
                    entity.coins,
                    entity.transferred_to.as_ref().map(EntityId::as_str),
                    serde_json::to_string(&entity.zone_time_ms)?,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(
            session_id,
            entities = summary.entities.len(),
            "session summary saved"
        );
        Ok(())
    }

    /// Lists stored sessions, most recently ended first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, start_time, end_time, tick_count, entity_count, total_coins
            FROM sessions
            ORDER BY end_time DESC, id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            let (id, start_time, end_time, tick_count, entity_count, total_coins) = row?;
            sessions.push(SessionRecord {
                session_id: parse_id(SessionId::new(id.as_str()), &id)?,
                start_time: start_time
                    .map(|ts| parse_timestamp(&ts, &id))
                    .transpose()?,
                end_time: parse_timestamp(&end_time, &id)?,
                tick_count: u64::try_from(tick_count).unwrap_or(0),
                entity_count: usize::try_from(entity_count).unwrap_or(0),
                total_coins,
            });
        }
        Ok(sessions)
    }

    /// Loads a stored summary, or `None` if the session is unknown.
    pub fn load_summary(&self, session_id: &SessionId) -> Result<Option<SessionSummary>, DbError> {
        let id = session_id.as_str();
        let header = self
            .conn
            .query_row(
                "SELECT start_time, end_time, tick_count FROM sessions WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((start_time, end_time, tick_count)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "
            SELECT entity_id, profile_id, device_id, start_time, end_time, status, coins, transferred_to, zone_time
            FROM session_entities
            WHERE session_id = ?
            ORDER BY position ASC
            ",
        )?;
        let rows = stmt.query_map([id], |row| {
            Ok(EntityRow {
                entity_id: row.get(0)?,
                profile_id: row.get(1)?,
                device_id: row.get(2)?,
                start_time: row.get(3)?,
                end_time: row.get(4)?,
                status: row.get(5)?,
                coins: row.get(6)?,
                transferred_to: row.get(7)?,
                zone_time: row.get(8)?,
            })
        })?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?.into_summary(id)?);
        }

        Ok(Some(SessionSummary {
            session_id: session_id.clone(),
            start_time: start_time.map(|ts| parse_timestamp(&ts, id)).transpose()?,
            end_time: parse_timestamp(&end_time, id)?,
            tick_count: u64::try_from(tick_count).unwrap_or(0),
            entities,
        }))
    }

    /// Stores a session's timeline export, replacing any previous copy.
    ///
    /// The session must already be saved.
    pub fn save_timeline(
        &mut self,
        session_id: &SessionId,
        series: &[SeriesExport],
    ) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM timeline_series WHERE session_id = ?",
            [session_id.as_str()],
        )?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO timeline_series (session_id, series_key, point_values) VALUES (?, ?, ?)",
            )?;
            for export in series {
                inserted += stmt.execute(params![
                    session_id.as_str(),
                    export.key.to_string(),
                    serde_json::to_string(&export.values)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Loads a session's timeline, ordered by series key.
    pub fn load_timeline(&self, session_id: &SessionId) -> Result<Vec<SeriesExport>, DbError> {
        let id = session_id.as_str();
        let mut stmt = self.conn.prepare(
            "
            SELECT series_key, point_values
            FROM timeline_series
            WHERE session_id = ?
            ORDER BY series_key ASC
            ",
        )?;
        let rows = stmt.query_map([id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut series = Vec::new();
        for row in rows {
            let (key, values) = row?;
            let key: SeriesKey = key.parse().map_err(|err| invalid(id, &err))?;
            series.push(SeriesExport {
                key,
                values: serde_json::from_str(&values)?,
            });
        }
        Ok(series)
    }

    /// Deletes a session and everything stored with it.
    ///
    /// Returns whether the session existed.
    pub fn delete_session(&mut self, session_id: &SessionId) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?", [session_id.as_str()])?;
        Ok(deleted > 0)
    }
}

struct EntityRow {
    entity_id: String,
    profile_id: String,
    device_id: String,
    start_time: String,
    end_time: Option<String>,
    status: String,
    coins: f64,
    transferred_to: Option<String>,
    zone_time: String,
}

impl EntityRow {
    fn into_summary(self, session_id: &str) -> Result<EntitySummary, DbError> {
        let status: EntityStatus = self
            .status
            .parse()
            .map_err(|err: String| invalid(session_id, &err))?;
        let zone_time_ms: BTreeMap<ZoneId, i64> = serde_json::from_str(&self.zone_time)?;
        Ok(EntitySummary {
            entity_id: parse_id(EntityId::new(self.entity_id), session_id)?,
            profile_id: parse_id(ProfileId::new(self.profile_id), session_id)?,
            device_id: parse_id(DeviceId::new(self.device_id), session_id)?,
            start_time: parse_timestamp(&self.start_time, session_id)?,
            end_time: self
                .end_time
                .map(|ts| parse_timestamp(&ts, session_id))
                .transpose()?,
            status,
            coins: self.coins,
            transferred_to: self
                .transferred_to
                .map(|id| parse_id(EntityId::new(id), session_id))
                .transpose()?,
            zone_time_ms,
        })
    }
}

fn parse_id<T>(
    parsed: Result<T, ft_core::ValidationError>,
    session_id: &str,
) -> Result<T, DbError> {
    parsed.map_err(|err| invalid(session_id, &err))
}

fn invalid(session_id: &str, err: &impl std::fmt::Display) -> DbError {
    DbError::InvalidData {
        session_id: session_id.to_string(),
        message: err.to_string(),
    }
}

fn parse_timestamp(timestamp: &str, session_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            session_id: session_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ft_core::SeriesOwner;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(seconds)
    }

    fn sid(s: &str) -> SessionId {
        SessionId::new(s).unwrap()
    }

    fn entity(
        id: &str,
        profile: &str,
        status: EntityStatus,
        coins: f64,
        transferred_to: Option<&str>,
    ) -> EntitySummary {
        EntitySummary {
            entity_id: EntityId::new(id).unwrap(),
            profile_id: ProfileId::new(profile).unwrap(),
            device_id: DeviceId::new("d1").unwrap(),
            start_time: ts(0),
            end_time: Some(ts(90)),
            status,
            coins,
            transferred_to: transferred_to.map(|t| EntityId::new(t).unwrap()),
            zone_time_ms: [(ZoneId::new("hot").unwrap(), 30_000)].into_iter().collect(),
        }
    }

    fn summary(id: &str, end: i64) -> SessionSummary {
        SessionSummary {
            session_id: sid(id),
            start_time: Some(ts(0)),
            end_time: ts(end),
            tick_count: 90,
            entities: vec![
                entity("ent-0001", "alan", EntityStatus::Transferred, 6.0, Some("ent-0002")),
                entity("ent-0002", "bob", EntityStatus::Dropped, 8.5, None),
            ],
        }
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        stmt.query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info")
            .map(|name| name.expect("column name"))
            .collect()
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");
        assert_eq!(
            table_columns(&db.conn, "session_entities"),
            vec![
                "session_id",
                "entity_id",
                "position",
                "profile_id",
                "device_id",
                "start_time",
                "end_time",
                "status",
                "coins",
                "transferred_to",
                "zone_time",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "timeline_series"),
            vec!["session_id", "series_key", "point_values"]
        );
    }

    #[test]
    fn init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.init().unwrap();
    }

    #[test]
    fn summary_survives_storage() {
        let mut db = Database::open_in_memory().unwrap();
        let original = summary("s1", 90);
        db.save_summary(&original).unwrap();

        let loaded = db.load_summary(&sid("s1")).unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(db.load_summary(&sid("missing")).unwrap().is_none());
    }

    #[test]
    fn saving_again_replaces_entities() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_summary(&summary("s1", 90)).unwrap();

        let mut updated = summary("s1", 120);
        updated.entities.truncate(1);
        db.save_summary(&updated).unwrap();

        let loaded = db.load_summary(&sid("s1")).unwrap().unwrap();
        assert_eq!(loaded.entities.len(), 1);
        assert_eq!(loaded.end_time, ts(120));
    }

    #[test]
    fn list_sessions_newest_first_with_participant_totals() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_summary(&summary("older", 60)).unwrap();
        db.save_summary(&summary("newer", 600)).unwrap();

        let sessions = db.list_sessions().unwrap();
        let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(sessions[0].entity_count, 2);
        assert_eq!(sessions[0].tick_count, 90);
        // The transferred entity's coins live on in its successor.
        assert!((sessions[0].total_coins - 8.5).abs() < 1e-9);
    }

    #[test]
    fn timeline_round_trips_with_gaps() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_summary(&summary("s1", 90)).unwrap();

        let owner = SeriesOwner::entity(&EntityId::new("ent-0002").unwrap());
        let series = vec![
            SeriesExport {
                key: owner.metric("coins"),
                values: vec![Some(0.0), None, Some(0.2)],
            },
            SeriesExport {
                key: owner.metric("heart_rate"),
                values: vec![Some(150.0), None, None],
            },
        ];
        assert_eq!(db.save_timeline(&sid("s1"), &series).unwrap(), 2);
        assert_eq!(db.load_timeline(&sid("s1")).unwrap(), series);
    }

    #[test]
    fn timeline_requires_saved_session() {
        let mut db = Database::open_in_memory().unwrap();
        let series = vec![SeriesExport {
            key: SeriesOwner::global("session").metric("active_count"),
            values: vec![Some(1.0)],
        }];
        assert!(matches!(
            db.save_timeline(&sid("ghost"), &series),
            Err(DbError::Sqlite(_))
        ));
    }

    #[test]
    fn delete_cascades() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_summary(&summary("s1", 90)).unwrap();
        assert!(db.delete_session(&sid("s1")).unwrap());
        assert!(!db.delete_session(&sid("s1")).unwrap());
        let remaining: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM session_entities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn corrupt_status_is_reported() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_summary(&summary("s1", 90)).unwrap();
        db.conn
            .execute("UPDATE session_entities SET status = 'paused'", [])
            .unwrap();
        let err = db.load_summary(&sid("s1")).unwrap_err();
        assert!(matches!(err, DbError::InvalidData { .. }), "{err}");
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ft.db");
        {
            let mut db = Database::open(&path).unwrap();
            db.save_summary(&summary("s1", 90)).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_sessions().unwrap().len(), 1);
    }
}
