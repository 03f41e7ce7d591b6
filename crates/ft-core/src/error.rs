//! Error taxonomy for session tracking.
//!
//! Errors raised while processing one inbound message are isolated to that
//! message: the orchestrator logs them, counts them in the snapshot, and keeps
//! processing the rest of the tick.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{EntityId, ProfileId, ValidationError};

/// Errors raised by the tracking components.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackingError {
    /// A device identifier was empty or malformed. No state was mutated.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(#[source] ValidationError),

    /// A profile identifier in an assignment was empty or malformed.
    #[error("invalid profile id: {0}")]
    InvalidProfileId(#[source] ValidationError),

    /// A component received an entity id with no registry entry.
    #[error("unknown entity reference: {0}")]
    UnknownEntityReference(EntityId),

    /// A sample was older than the last one processed for its entity.
    #[error(
        "stale sample for {entity_id} discarded: {timestamp} is before last processed {last_processed}"
    )]
    StaleSampleDiscarded {
        entity_id: EntityId,
        timestamp: DateTime<Utc>,
        last_processed: DateTime<Utc>,
    },

    /// No zone profile is configured for a profile.
    #[error("no zone profile configured for profile {0}")]
    ConfigurationMissing(ProfileId),

    /// The timeline was ticked with an index other than the next expected one.
    #[error("timeline tick out of order: expected {expected}, got {actual}")]
    TickOutOfOrder { expected: u64, actual: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_device_id_message_includes_cause() {
        let err = TrackingError::InvalidDeviceId(ValidationError::Empty { field: "device ID" });
        assert_eq!(err.to_string(), "invalid device id: device ID cannot be empty");
    }

    #[test]
    fn tick_out_of_order_message() {
        let err = TrackingError::TickOutOfOrder {
            expected: 3,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "timeline tick out of order: expected 3, got 5"
        );
    }
}
