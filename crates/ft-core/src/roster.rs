//! Participant roster: who is active and in what zone.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{ConnectionState, DeviceRegistry};
use crate::entity::SessionEntityRegistry;
use crate::ledger::DeviceAssignmentLedger;
use crate::profile::ProfileStore;
use crate::treasure::TreasureBox;
use crate::types::{DeviceId, EntityId, ProfileId, ZoneId};

/// One participant as seen at a tick boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub entity_id: EntityId,
    pub profile_id: ProfileId,
    pub display_name: String,
    pub device_id: DeviceId,
    pub connection: ConnectionState,
    /// Current zone; `None` when the device is not connected, the reading is
    /// outside every band, or the profile has no zone configuration.
    pub zone_id: Option<ZoneId>,
    pub heart_rate: Option<f64>,
    pub coins: f64,
    pub start_time: DateTime<Utc>,
    /// The profile has no zone profile configured.
    #[serde(default)]
    pub configuration_missing: bool,
}

impl RosterEntry {
    /// Whether this participant counts towards group policies.
    ///
    /// Stale devices still count (and fail the zone check); removed devices don't.
    pub fn counts_for_governance(&self) -> bool {
        self.connection != ConnectionState::Disconnected
    }
}

/// The participant view derived from the ledger, devices and zone state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
}

impl Roster {
    /// Joins ledger entries with entity, device, coin and profile state.
    ///
    /// Only active entities appear; transferred and dropped entities are
    /// reported in the session summary instead.
    pub fn build(
        ledger: &DeviceAssignmentLedger,
        entities: &SessionEntityRegistry,
        devices: &DeviceRegistry,
        treasure: &TreasureBox,
        profiles: &dyn ProfileStore,
    ) -> Self {
        let mut entries: Vec<RosterEntry> = ledger
            .entries()
            .filter_map(|entry| {
                let entity = entities.get(&entry.entity_id)?;
                if !entity.is_active() {
                    return None;
                }
                let connection = devices.connection_state(&entry.device_id);
                let profile = profiles.profile(&entry.profile_id);
                let configuration_missing =
                    profile.as_ref().is_none_or(|p| p.zones.is_none());
                let zone_id = if connection == ConnectionState::Connected {
                    treasure.current_zone(&entity.entity_id).cloned()
                } else {
                    None
                };
                let heart_rate = treasure
                    .accumulator(&entity.entity_id)
                    .and_then(|acc| acc.last_heart_rate)
                    .filter(|_| connection == ConnectionState::Connected);
                Some(RosterEntry {
                    entity_id: entity.entity_id.clone(),
                    profile_id: entity.profile_id.clone(),
                    display_name: profile
                        .map_or_else(|| entity.profile_id.to_string(), |p| p.display_name),
                    device_id: entry.device_id.clone(),
                    connection,
                    zone_id,
                    heart_rate,
                    coins: treasure.total(&entity.entity_id).unwrap_or(entity.coins),
                    start_time: entity.start_time,
                    configuration_missing,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Self { entries }
    }

    /// Entities that count towards group policies.
    pub fn active_entities(&self) -> BTreeSet<EntityId> {
        self.entries
            .iter()
            .filter(|e| e.counts_for_governance())
            .map(|e| e.entity_id.clone())
            .collect()
    }

    /// Entity → zone map for governance evaluation.
    pub fn zone_map(&self) -> HashMap<EntityId, Option<ZoneId>> {
        self.entries
            .iter()
            .map(|e| (e.entity_id.clone(), e.zone_id.clone()))
            .collect()
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| &e.entity_id == entity_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
