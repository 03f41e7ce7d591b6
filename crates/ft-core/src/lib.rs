//! Core domain logic for fitness session tracking.
//!
//! This crate contains the fundamental types and logic for:
//! - Assignment: mapping devices to participants, with transfers and dropouts
//! - Coins: zone detection and dwell-time awards per entity
//! - Timeline: tick-aligned metric series with gap back-fill
//! - Governance: group zone requirements over the live roster
//!
//! Everything here is synchronous and owned by a single session; the
//! `ft-session` crate drives it from a tick loop.

pub mod config;
pub mod device;
pub mod entity;
mod error;
pub mod governance;
pub mod ledger;
pub mod message;
pub mod metric;
pub mod profile;
pub mod roster;
pub mod snapshot;
pub mod timeline;
pub mod treasure;
pub mod types;
pub mod zone;

pub use config::{PolicyConfig, SessionConfig};
pub use device::{ConnectionState, Device, DeviceRegistry};
pub use entity::{EntityStatus, SessionEntity, SessionEntityRegistry};
pub use error::TrackingError;
pub use governance::{GovernanceResult, Policy, Quorum};
pub use ledger::{
    Assignment, AssignmentDecision, AssignmentPlan, DeviceAssignmentLedger, LedgerEvent,
    LedgerEventKind, TransferCommand,
};
pub use message::{AssignRequest, DeviceEvent, InboundMessage, Sample};
pub use metric::{MetricKind, UnknownMetric};
pub use profile::{Profile, ProfileStore, StaticProfiles};
pub use roster::{Roster, RosterEntry};
pub use snapshot::{EntitySummary, SessionState, SessionSummary, Snapshot};
pub use timeline::{FitnessTimeline, SeriesExport, SeriesKey, SeriesOwner};
pub use treasure::TreasureBox;
pub use types::{DeviceId, EntityId, ProfileId, SessionId, ValidationError, ZoneId};
pub use zone::{ZoneBand, ZoneDefinition, ZoneProfile, ZoneTable};
