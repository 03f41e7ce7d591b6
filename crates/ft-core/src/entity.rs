//! Session entities: time-bounded participation records.
//!
//! An entity is distinct from the durable profile it references. Coins and
//! timeline data are attributed to entities, never to profiles, so a device
//! changing hands mid-session cannot smear one person's data onto another.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::types::{DeviceId, EntityId, ProfileId};

/// Lifecycle status of a session entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    /// Ended by a dropout or by the session ending; data stays attributed to it.
    Dropped,
    /// Handed over to another entity within the grace period.
    Transferred,
}

impl EntityStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dropped => "dropped",
            Self::Transferred => "transferred",
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "dropped" => Ok(Self::Dropped),
            "transferred" => Ok(Self::Transferred),
            _ => Err(format!("invalid entity status: {s}")),
        }
    }
}

/// A participation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntity {
    pub entity_id: EntityId,
    pub profile_id: ProfileId,
    pub device_id: DeviceId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: EntityStatus,
    pub coins: f64,
    pub transferred_to: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transferred_from: Option<EntityId>,
}

impl SessionEntity {
    pub const fn is_active(&self) -> bool {
        matches!(self.status, EntityStatus::Active)
    }

    /// The record after handing over to `successor` at `at`.
    #[must_use]
    pub fn transferred(&self, successor: &EntityId, at: DateTime<Utc>) -> Self {
        Self {
            status: EntityStatus::Transferred,
            end_time: Some(at),
            transferred_to: Some(successor.clone()),
            ..self.clone()
        }
    }

    /// The record after ending at `at` with its data intact.
    #[must_use]
    pub fn dropped(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: EntityStatus::Dropped,
            end_time: Some(at),
            ..self.clone()
        }
    }

    /// Participation duration up to `now`, or up to `end_time` once ended.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0)
    }
}

/// Creates and tracks session entities in creation order.
#[derive(Debug, Clone, Default)]
pub struct SessionEntityRegistry {
    entities: HashMap<EntityId, SessionEntity>,
    order: Vec<EntityId>,
}

impl SessionEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an active entity and returns its id.
    pub fn create(
        &mut self,
        profile_id: ProfileId,
        device_id: DeviceId,
        start_time: DateTime<Utc>,
        inherited: Option<(&EntityId, f64)>,
    ) -> EntityId {
        let entity_id = self.next_id();
        let (transferred_from, coins) =
            inherited.map_or((None, 0.0), |(from, coins)| (Some(from.clone()), coins));
        let entity = SessionEntity {
            entity_id: entity_id.clone(),
            profile_id,
            device_id,
            start_time,
            end_time: None,
            status: EntityStatus::Active,
            coins,
            transferred_to: None,
            transferred_from,
        };
        self.entities.insert(entity_id.clone(), entity);
        self.order.push(entity_id.clone());
        entity_id
    }

    fn next_id(&self) -> EntityId {
        EntityId::sequential(self.order.len() + 1)
    }

    pub fn get(&self, id: &EntityId) -> Option<&SessionEntity> {
        self.entities.get(id)
    }

    pub fn is_active(&self, id: &EntityId) -> bool {
        self.entities.get(id).is_some_and(SessionEntity::is_active)
    }

    /// Replaces a record with its successor state.
    pub fn replace(&mut self, record: SessionEntity) -> Result<(), TrackingError> {
        match self.entities.get_mut(&record.entity_id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(TrackingError::UnknownEntityReference(record.entity_id)),
        }
    }

    /// Updates the live coin total of an active entity.
    ///
    /// Ended entities are frozen; updates to them are ignored.
    pub fn sync_coins(&mut self, id: &EntityId, coins: f64) -> Result<(), TrackingError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| TrackingError::UnknownEntityReference(id.clone()))?;
        if entity.is_active() {
            entity.coins = coins;
        }
        Ok(())
    }

    /// Ends every active entity at `at`, returning the ids that were ended.
    pub fn finalize_active(&mut self, at: DateTime<Utc>) -> Vec<EntityId> {
        let mut ended = Vec::new();
        for id in &self.order {
            if let Some(entity) = self.entities.get_mut(id) {
                if entity.is_active() {
                    *entity = entity.dropped(at);
                    ended.push(id.clone());
                }
            }
        }
        ended
    }

    /// Every entity ever created, in creation order.
    pub fn in_creation_order(&self) -> impl Iterator<Item = &SessionEntity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Active entities in creation order.
    pub fn active(&self) -> impl Iterator<Item = &SessionEntity> {
        self.in_creation_order().filter(|e| e.is_active())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(seconds)
    }

    fn pid(s: &str) -> ProfileId {
        ProfileId::new(s).unwrap()
    }

    fn did(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[test]
    fn ids_are_unique_per_creation() {
        let mut registry = SessionEntityRegistry::new();
        let a = registry.create(pid("alan"), did("d1"), ts(0), None);
        let b = registry.create(pid("alan"), did("d1"), ts(5), None);
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "ent-0001");
        assert_eq!(b.as_str(), "ent-0002");
    }

    #[test]
    fn transferred_record_points_at_successor() {
        let mut registry = SessionEntityRegistry::new();
        let a = registry.create(pid("alan"), did("d1"), ts(0), None);
        let b = registry.create(pid("bob"), did("d1"), ts(0), Some((&a, 4.0)));

        let record = registry.get(&a).unwrap().transferred(&b, ts(30));
        registry.replace(record).unwrap();

        let a_rec = registry.get(&a).unwrap();
        assert_eq!(a_rec.status, EntityStatus::Transferred);
        assert_eq!(a_rec.transferred_to.as_ref(), Some(&b));
        assert_eq!(a_rec.end_time, Some(ts(30)));

        let b_rec = registry.get(&b).unwrap();
        assert_eq!(b_rec.transferred_from.as_ref(), Some(&a));
        assert!((b_rec.coins - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ended_entities_ignore_coin_updates() {
        let mut registry = SessionEntityRegistry::new();
        let a = registry.create(pid("alan"), did("d1"), ts(0), None);
        registry.sync_coins(&a, 6.0).unwrap();
        let dropped = registry.get(&a).unwrap().dropped(ts(90));
        registry.replace(dropped).unwrap();

        registry.sync_coins(&a, 100.0).unwrap();
        assert!((registry.get(&a).unwrap().coins - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_entity_is_reported() {
        let mut registry = SessionEntityRegistry::new();
        let ghost = EntityId::new("ent-9999").unwrap();
        assert_eq!(
            registry.sync_coins(&ghost, 1.0),
            Err(TrackingError::UnknownEntityReference(ghost))
        );
    }

    #[test]
    fn finalize_ends_only_active_entities_in_order() {
        let mut registry = SessionEntityRegistry::new();
        let a = registry.create(pid("alan"), did("d1"), ts(0), None);
        let b = registry.create(pid("bob"), did("d2"), ts(1), None);
        let dropped = registry.get(&a).unwrap().dropped(ts(10));
        registry.replace(dropped).unwrap();

        let ended = registry.finalize_active(ts(60));
        assert_eq!(ended, vec![b.clone()]);
        assert_eq!(registry.get(&a).unwrap().end_time, Some(ts(10)));
        assert_eq!(registry.get(&b).unwrap().end_time, Some(ts(60)));
        assert_eq!(registry.active().count(), 0);
    }

    #[test]
    fn duration_stops_at_end_time() {
        let mut registry = SessionEntityRegistry::new();
        let a = registry.create(pid("alan"), did("d1"), ts(0), None);
        assert_eq!(registry.get(&a).unwrap().duration_ms(ts(20)), 20_000);
        let dropped = registry.get(&a).unwrap().dropped(ts(30));
        assert_eq!(dropped.duration_ms(ts(500)), 30_000);
    }
}
