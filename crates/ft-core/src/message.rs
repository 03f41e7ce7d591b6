//! Normalized inbound messages from the device bridge and the control surface.
//!
//! Identifiers are carried as raw strings so a malformed id can be rejected
//! while processing (without mutating anything) instead of failing the whole
//! stream at deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::MetricKind;

/// One normalized sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub device_id: String,
    pub metric: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Request to bind a device to a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub device_id: String,
    pub profile_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A control event that concerns a single device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything that can be queued for the next tick.
///
/// Samples and ledger writes share one queue so that an assignment is always
/// ordered relative to the samples of the same device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A sensor reading.
    Sample(Sample),
    /// A device changes owner (or gets its first owner).
    Assign(AssignRequest),
    /// The owner hands the device back without a new owner.
    Release(DeviceEvent),
    /// The device bridge lost the device.
    Disconnect(DeviceEvent),
}

impl InboundMessage {
    /// When the message was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Sample(s) => s.timestamp,
            Self::Assign(a) => a.timestamp,
            Self::Release(e) | Self::Disconnect(e) => e.timestamp,
        }
    }

    /// The raw device id the message concerns.
    pub fn device_id(&self) -> &str {
        match self {
            Self::Sample(s) => &s.device_id,
            Self::Assign(a) => &a.device_id,
            Self::Release(e) | Self::Disconnect(e) => &e.device_id,
        }
    }
}

impl From<Sample> for InboundMessage {
    fn from(sample: Sample) -> Self {
        Self::Sample(sample)
    }
}
