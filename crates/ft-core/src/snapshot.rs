//! Read-only views published at tick boundaries and at session end.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityStatus, SessionEntity};
use crate::governance::GovernanceResult;
use crate::ledger::LedgerEvent;
use crate::roster::Roster;
use crate::types::{DeviceId, EntityId, ProfileId, SessionId, ZoneId};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no device assigned yet.
    Idle,
    Active,
    Ended,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned copy of the session state at one tick boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub session_id: SessionId,
    /// Index of the timeline tick this snapshot closes, starting at 0.
    pub tick_index: u64,
    pub taken_at: DateTime<Utc>,
    pub state: SessionState,
    pub roster: Roster,
    pub coin_totals: BTreeMap<EntityId, f64>,
    pub governance: GovernanceResult,
    /// Ledger events committed during this tick.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<LedgerEvent>,
    /// Inbound messages rejected during this tick.
    #[serde(default)]
    pub rejected: usize,
}

/// Final record of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub entity_id: EntityId,
    pub profile_id: ProfileId,
    pub device_id: DeviceId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: EntityStatus,
    pub coins: f64,
    pub transferred_to: Option<EntityId>,
    /// Awarded time per zone, in milliseconds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zone_time_ms: BTreeMap<ZoneId, i64>,
}

impl EntitySummary {
    pub fn from_entity(entity: &SessionEntity, zone_time_ms: BTreeMap<ZoneId, i64>) -> Self {
        Self {
            entity_id: entity.entity_id.clone(),
            profile_id: entity.profile_id.clone(),
            device_id: entity.device_id.clone(),
            start_time: entity.start_time,
            end_time: entity.end_time,
            status: entity.status,
            coins: entity.coins,
            transferred_to: entity.transferred_to.clone(),
            zone_time_ms,
        }
    }
}

/// Emitted once when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub tick_count: u64,
    /// Every entity ever created, in creation order.
    pub entities: Vec<EntitySummary>,
}

impl SessionSummary {
    /// Entities that represent a participant's own effort.
    ///
    /// Transferred entities handed their coins to a successor and are left
    /// out so nothing is counted twice.
    pub fn participants(&self) -> impl Iterator<Item = &EntitySummary> {
        self.entities
            .iter()
            .filter(|e| e.status != EntityStatus::Transferred)
    }

    /// Sum of coins across participants.
    pub fn total_coins(&self) -> f64 {
        self.participants().map(|e| e.coins).sum()
    }

    /// Coins per profile across participants, for leaderboards.
    pub fn coins_by_profile(&self) -> BTreeMap<ProfileId, f64> {
        let mut totals = BTreeMap::new();
        for entity in self.participants() {
            *totals.entry(entity.profile_id.clone()).or_insert(0.0) += entity.coins;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary_entity(id: &str, profile: &str, status: EntityStatus, coins: f64) -> EntitySummary {
        EntitySummary {
            entity_id: EntityId::new(id).unwrap(),
            profile_id: ProfileId::new(profile).unwrap(),
            device_id: DeviceId::new("d1").unwrap(),
            start_time: Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap(),
            end_time: None,
            status,
            coins,
            transferred_to: None,
            zone_time_ms: BTreeMap::new(),
        }
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            session_id: SessionId::new("s1").unwrap(),
            start_time: None,
            end_time: Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
            tick_count: 0,
            entities: vec![
                summary_entity("ent-0001", "alan", EntityStatus::Transferred, 6.0),
                summary_entity("ent-0002", "bob", EntityStatus::Dropped, 10.0),
                summary_entity("ent-0003", "alan", EntityStatus::Dropped, 2.5),
            ],
        }
    }

    #[test]
    fn participants_exclude_transferred() {
        let summary = summary();
        let ids: Vec<_> = summary.participants().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["ent-0002", "ent-0003"]);
        assert!((summary.total_coins() - 12.5).abs() < 1e-9);
    }

    #[test]
    fn coins_by_profile_sums_participants() {
        let totals = summary().coins_by_profile();
        assert!((totals[&ProfileId::new("alan").unwrap()] - 2.5).abs() < 1e-9);
        assert!((totals[&ProfileId::new("bob").unwrap()] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let json = serde_json::to_value(summary()).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["entities"][0]["status"], "transferred");
        assert!(json["entities"][0]["transferredTo"].is_null());
    }
}
