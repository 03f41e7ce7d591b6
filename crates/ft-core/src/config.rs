//! Per-session tuning knobs.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::governance::{Policy, Quorum};
use crate::types::ZoneId;
use crate::zone::ZoneTable;

/// Group policy as written in configuration, before zone ranks are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Lowest zone that counts as participating.
    pub min_zone: ZoneId,
    pub quorum: Quorum,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_zone: ZoneId::from_static("active"),
            quorum: Quorum::All,
        }
    }
}

/// Configuration for one tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Window after an assignment within which a reassignment is a transfer.
    /// Default: 60000 (1 minute).
    pub grace_period_ms: i64,

    /// Default: 1000.
    pub tick_interval_ms: i64,

    /// Silence after which a device is reported stale.
    /// Default: 10000.
    pub stale_device_timeout_ms: i64,

    /// Silence across all devices after which the session ends on its own.
    /// Default: 300000 (5 minutes).
    pub session_timeout_ms: i64,

    /// Longest gap between two samples that still earns coins.
    /// Default: 30000.
    pub max_dwell_gap_ms: i64,

    /// Capacity of the inbound message queue.
    pub queue_capacity: usize,

    pub zones: ZoneTable,
    pub policy: PolicyConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 60_000,
            tick_interval_ms: 1_000,
            stale_device_timeout_ms: 10_000,
            session_timeout_ms: 300_000,
            max_dwell_gap_ms: 30_000,
            queue_capacity: 1024,
            zones: ZoneTable::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::milliseconds(self.grace_period_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::milliseconds(self.tick_interval_ms.max(1))
    }

    pub fn stale_device_timeout(&self) -> Duration {
        Duration::milliseconds(self.stale_device_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::milliseconds(self.session_timeout_ms)
    }

    pub fn max_dwell_gap(&self) -> Duration {
        Duration::milliseconds(self.max_dwell_gap_ms)
    }

    /// Resolves the configured policy against the zone table.
    ///
    /// A `minZone` missing from the table can never be reached, so it maps to a
    /// rank above every zone.
    pub fn policy(&self) -> Policy {
        let min_rank = self.zones.rank(&self.policy.min_zone).unwrap_or_else(|| {
            tracing::warn!(
                min_zone = %self.policy.min_zone,
                "policy zone not in zone table, policy can never be satisfied"
            );
            u32::try_from(self.zones.zones.len()).unwrap_or(u32::MAX)
        });
        Policy {
            min_rank,
            quorum: self.policy.quorum,
        }
    }
}
