//! Device assignment ledger.
//!
//! Maps each device to the profile currently wearing it and the entity that
//! accumulates that person's data. There is exactly one map slot per device id,
//! so two live entries for the same device cannot exist.
//!
//! # Reassignment
//!
//! When a device moves to a different profile, the elapsed time since the
//! ledger entry was last written decides what happens to the outgoing entity:
//!
//! - `elapsed < grace_period`: **transfer**. The outgoing entity is marked
//!   transferred; the new entity inherits its start time and its accumulated
//!   coins and timeline.
//! - `elapsed >= grace_period`: **dropout**. The outgoing entity is finalized
//!   with its data intact; the new entity starts fresh.
//!
//! The decision is computed by [`decide`], a pure function, and committed by
//! [`DeviceAssignmentLedger::commit`], which returns the side effects the
//! caller must apply to the treasure box and timeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{SessionEntity, SessionEntityRegistry};
use crate::error::TrackingError;
use crate::types::{DeviceId, EntityId, ProfileId};

/// Current assignment of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub device_id: DeviceId,
    pub profile_id: ProfileId,
    pub entity_id: EntityId,
    pub updated_at: DateTime<Utc>,
}

/// What an assignment request means given the previous ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentDecision {
    /// No previous entry: create the first entity for this device.
    Create,
    /// Same profile already assigned: nothing changes.
    Keep(EntityId),
    /// Different profile within the grace period.
    Transfer { previous: LedgerEntry },
    /// Different profile after the grace period.
    Dropout { previous: LedgerEntry },
}

impl AssignmentDecision {
    /// The entity that stops being active if this decision is committed.
    pub const fn outgoing_entity(&self) -> Option<&EntityId> {
        match self {
            Self::Transfer { previous } | Self::Dropout { previous } => Some(&previous.entity_id),
            Self::Create | Self::Keep(_) => None,
        }
    }
}

/// Decides how an assignment request relates to the previous entry.
pub fn decide(
    previous: Option<&LedgerEntry>,
    profile_id: &ProfileId,
    now: DateTime<Utc>,
    grace_period: Duration,
) -> AssignmentDecision {
    let Some(previous) = previous else {
        return AssignmentDecision::Create;
    };
    if &previous.profile_id == profile_id {
        return AssignmentDecision::Keep(previous.entity_id.clone());
    }
    // A request timestamped before the entry it replaces counts as zero elapsed.
    let elapsed = (now - previous.updated_at).max(Duration::zero());
    if elapsed < grace_period {
        AssignmentDecision::Transfer {
            previous: previous.clone(),
        }
    } else {
        AssignmentDecision::Dropout {
            previous: previous.clone(),
        }
    }
}

/// A validated, not yet committed assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentPlan {
    pub device_id: DeviceId,
    pub profile_id: ProfileId,
    pub at: DateTime<Utc>,
    pub decision: AssignmentDecision,
}

/// Audit event kinds emitted by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEventKind {
    EntityCreated,
    EntityTransferred,
    EntityDropped,
}

/// Audit record of an entity lifecycle change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub kind: LedgerEventKind,
    pub entity_id: EntityId,
    pub profile_id: ProfileId,
    pub device_id: DeviceId,
    pub duration_ms: i64,
    pub coins: f64,
    pub at: DateTime<Utc>,
}

/// Side effects of a transfer that other components must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferCommand {
    /// Move the coin accumulator from one entity to another.
    MergeAccumulator { from: EntityId, to: EntityId },
    /// Route the entity's future timeline writes to the new entity.
    RekeySeries { from: EntityId, to: EntityId },
}

/// Result of committing an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub entity_id: EntityId,
    /// Whether a new entity was created.
    pub created: bool,
    pub events: Vec<LedgerEvent>,
    pub commands: Vec<TransferCommand>,
}

/// Device → current owner map.
#[derive(Debug, Clone)]
pub struct DeviceAssignmentLedger {
    entries: BTreeMap<DeviceId, LedgerEntry>,
    grace_period: Duration,
}

impl DeviceAssignmentLedger {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            grace_period,
        }
    }

    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Current entry for a device.
    pub fn entry(&self, device_id: &DeviceId) -> Option<&LedgerEntry> {
        self.entries.get(device_id)
    }

    /// Entity currently fed by a device.
    pub fn entity_for(&self, device_id: &DeviceId) -> Option<&EntityId> {
        self.entries.get(device_id).map(|e| &e.entity_id)
    }

    /// Entries ordered by device id.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Validates a request and decides what it means, without mutating anything.
    pub fn plan(
        &self,
        device_id: &str,
        profile_id: &ProfileId,
        at: DateTime<Utc>,
    ) -> Result<AssignmentPlan, TrackingError> {
        let device_id = DeviceId::new(device_id).map_err(TrackingError::InvalidDeviceId)?;
        let decision = decide(
            self.entries.get(&device_id),
            profile_id,
            at,
            self.grace_period,
        );
        Ok(AssignmentPlan {
            device_id,
            profile_id: profile_id.clone(),
            at,
            decision,
        })
    }

    /// Applies a plan to the ledger and entity registry.
    ///
    /// Callers must settle the outgoing entity's coins into the registry
    /// before committing, so the emitted events carry final totals.
    pub fn commit(
        &mut self,
        plan: AssignmentPlan,
        entities: &mut SessionEntityRegistry,
    ) -> Result<Assignment, TrackingError> {
        let AssignmentPlan {
            device_id,
            profile_id,
            at,
            decision,
        } = plan;

        let mut events = Vec::new();
        let mut commands = Vec::new();

        let entity_id = match decision {
            AssignmentDecision::Keep(entity_id) => {
                return Ok(Assignment {
                    entity_id,
                    created: false,
                    events,
                    commands,
                });
            }
            AssignmentDecision::Create => {
                let entity_id =
                    entities.create(profile_id.clone(), device_id.clone(), at, None);
                events.push(created_event(&entity_id, &profile_id, &device_id, 0.0, at));
                entity_id
            }
            AssignmentDecision::Transfer { previous } => {
                let outgoing = entities
                    .get(&previous.entity_id)
                    .cloned()
                    .ok_or_else(|| TrackingError::UnknownEntityReference(previous.entity_id.clone()))?;
                let entity_id = entities.create(
                    profile_id.clone(),
                    device_id.clone(),
                    outgoing.start_time,
                    Some((&outgoing.entity_id, outgoing.coins)),
                );
                entities.replace(outgoing.transferred(&entity_id, at))?;
                events.push(LedgerEvent {
                    kind: LedgerEventKind::EntityTransferred,
                    entity_id: outgoing.entity_id.clone(),
                    profile_id: outgoing.profile_id.clone(),
                    device_id: device_id.clone(),
                    duration_ms: outgoing.duration_ms(at),
                    coins: outgoing.coins,
                    at,
                });
                commands.push(TransferCommand::MergeAccumulator {
                    from: outgoing.entity_id.clone(),
                    to: entity_id.clone(),
                });
                commands.push(TransferCommand::RekeySeries {
                    from: outgoing.entity_id,
                    to: entity_id.clone(),
                });
                entity_id
            }
            AssignmentDecision::Dropout { previous } => {
                let outgoing = entities
                    .get(&previous.entity_id)
                    .cloned()
                    .ok_or_else(|| TrackingError::UnknownEntityReference(previous.entity_id.clone()))?;
                entities.replace(outgoing.dropped(at))?;
                events.push(dropped_event(&outgoing, &device_id, at));
                let entity_id =
                    entities.create(profile_id.clone(), device_id.clone(), at, None);
                events.push(created_event(&entity_id, &profile_id, &device_id, 0.0, at));
                entity_id
            }
        };

        self.entries.insert(
            device_id.clone(),
            LedgerEntry {
                device_id,
                profile_id,
                entity_id: entity_id.clone(),
                updated_at: at,
            },
        );

        Ok(Assignment {
            entity_id,
            created: true,
            events,
            commands,
        })
    }

    /// Plans and commits in one step.
    pub fn assign(
        &mut self,
        device_id: &str,
        profile_id: &ProfileId,
        at: DateTime<Utc>,
        entities: &mut SessionEntityRegistry,
    ) -> Result<Assignment, TrackingError> {
        let plan = self.plan(device_id, profile_id, at)?;
        self.commit(plan, entities)
    }

    /// Removes a device's entry and drops its entity.
    ///
    /// Returns `None` if the device had no entry.
    pub fn release(
        &mut self,
        device_id: &DeviceId,
        at: DateTime<Utc>,
        entities: &mut SessionEntityRegistry,
    ) -> Result<Option<LedgerEvent>, TrackingError> {
        let Some(entry) = self.entries.remove(device_id) else {
            return Ok(None);
        };
        let outgoing = entities
            .get(&entry.entity_id)
            .cloned()
            .ok_or_else(|| TrackingError::UnknownEntityReference(entry.entity_id.clone()))?;
        entities.replace(outgoing.dropped(at))?;
        Ok(Some(dropped_event(&outgoing, device_id, at)))
    }

    /// Clears every entry; used when the session ends.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn created_event(
    entity_id: &EntityId,
    profile_id: &ProfileId,
    device_id: &DeviceId,
    coins: f64,
    at: DateTime<Utc>,
) -> LedgerEvent {
    LedgerEvent {
        kind: LedgerEventKind::EntityCreated,
        entity_id: entity_id.clone(),
        profile_id: profile_id.clone(),
        device_id: device_id.clone(),
        duration_ms: 0,
        coins,
        at,
    }
}

fn dropped_event(
    outgoing: &SessionEntity,
    device_id: &DeviceId,
    at: DateTime<Utc>,
) -> LedgerEvent {
    LedgerEvent {
        kind: LedgerEventKind::EntityDropped,
        entity_id: outgoing.entity_id.clone(),
        profile_id: outgoing.profile_id.clone(),
        device_id: device_id.clone(),
        duration_ms: outgoing.duration_ms(at),
        coins: outgoing.coins,
        at,
    }
}
