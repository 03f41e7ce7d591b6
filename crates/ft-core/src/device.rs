//! Physical sensor registry.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::MetricKind;
use crate::types::DeviceId;

/// Connection state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Reported within the stale window.
    Connected,
    /// Silent for longer than the stale window but not removed.
    Stale,
    /// Explicitly disconnected, or never seen.
    Disconnected,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Stale => "stale",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical sensor known to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub kind: MetricKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub connection_state: ConnectionState,
    /// Latest reading of the device's own metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<f64>,
}

/// Tracks sensor identity, last-seen time and connection state.
///
/// Devices are created on their first sample, become stale after a silence
/// window, and are removed on an explicit disconnect.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, Device>,
    last_activity_at: Option<DateTime<Utc>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reading, creating the device on first sight.
    ///
    /// Out-of-order timestamps never move `last_seen` backwards.
    pub fn observe(
        &mut self,
        id: &DeviceId,
        metric: MetricKind,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> &Device {
        self.last_activity_at = Some(
            self.last_activity_at
                .map_or(timestamp, |last| last.max(timestamp)),
        );

        let device = self.devices.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(device_id = %id, kind = %metric, "device registered");
            Device {
                id: id.clone(),
                kind: metric,
                first_seen: timestamp,
                last_seen: timestamp,
                connection_state: ConnectionState::Connected,
                last_value: None,
            }
        });

        if device.connection_state == ConnectionState::Stale {
            tracing::debug!(device_id = %id, "stale device reconnected");
        }
        device.connection_state = ConnectionState::Connected;
        device.last_seen = device.last_seen.max(timestamp);
        if metric == device.kind {
            device.last_value = Some(value);
        }
        device
    }

    /// Marks devices silent for at least `timeout` as stale.
    ///
    /// Returns the devices that transitioned on this sweep.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<DeviceId> {
        let mut newly_stale = Vec::new();
        for device in self.devices.values_mut() {
            if device.connection_state == ConnectionState::Connected
                && now - device.last_seen >= timeout
            {
                device.connection_state = ConnectionState::Stale;
                newly_stale.push(device.id.clone());
            }
        }
        for id in &newly_stale {
            tracing::debug!(device_id = %id, "device went stale");
        }
        newly_stale
    }

    /// Removes a device. The returned record is marked disconnected.
    pub fn disconnect(&mut self, id: &DeviceId) -> Option<Device> {
        let mut device = self.devices.remove(id)?;
        device.connection_state = ConnectionState::Disconnected;
        tracing::debug!(device_id = %id, "device disconnected");
        Some(device)
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Connection state of a device; unknown devices are disconnected.
    pub fn connection_state(&self, id: &DeviceId) -> ConnectionState {
        self.devices
            .get(id)
            .map_or(ConnectionState::Disconnected, |d| d.connection_state)
    }

    /// Devices ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Whether any registered device is currently connected.
    pub fn any_connected(&self) -> bool {
        self.devices
            .values()
            .any(|d| d.connection_state == ConnectionState::Connected)
    }

    /// Latest sample time seen from any device, including removed ones.
    pub const fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_activity_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(seconds)
    }

    fn did(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[test]
    fn first_sample_creates_connected_device() {
        let mut registry = DeviceRegistry::new();
        let device = registry.observe(&did("hr-1"), MetricKind::HeartRate, 120.0, ts(0));
        assert_eq!(device.kind, MetricKind::HeartRate);
        assert_eq!(device.connection_state, ConnectionState::Connected);
        assert_eq!(device.last_value, Some(120.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn out_of_order_sample_does_not_rewind_last_seen() {
        let mut registry = DeviceRegistry::new();
        registry.observe(&did("hr-1"), MetricKind::HeartRate, 120.0, ts(10));
        registry.observe(&did("hr-1"), MetricKind::HeartRate, 121.0, ts(5));
        assert_eq!(registry.get(&did("hr-1")).unwrap().last_seen, ts(10));
    }

    #[test]
    fn silent_device_goes_stale_and_recovers() {
        let mut registry = DeviceRegistry::new();
        registry.observe(&did("hr-1"), MetricKind::HeartRate, 120.0, ts(0));
        registry.observe(&did("hr-2"), MetricKind::HeartRate, 110.0, ts(8));

        let stale = registry.sweep_stale(ts(10), Duration::seconds(10));
        assert_eq!(stale, vec![did("hr-1")]);
        assert_eq!(registry.connection_state(&did("hr-1")), ConnectionState::Stale);
        assert!(registry.any_connected());

        // A second sweep does not report it again.
        assert!(registry.sweep_stale(ts(11), Duration::seconds(10)).is_empty());

        registry.observe(&did("hr-1"), MetricKind::HeartRate, 125.0, ts(12));
        assert_eq!(
            registry.connection_state(&did("hr-1")),
            ConnectionState::Connected
        );
    }

    #[test]
    fn disconnect_removes_device() {
        let mut registry = DeviceRegistry::new();
        registry.observe(&did("cad-1"), MetricKind::Cadence, 80.0, ts(0));
        let removed = registry.disconnect(&did("cad-1")).unwrap();
        assert_eq!(removed.connection_state, ConnectionState::Disconnected);
        assert!(registry.is_empty());
        assert_eq!(
            registry.connection_state(&did("cad-1")),
            ConnectionState::Disconnected
        );
        assert_eq!(registry.last_activity_at(), Some(ts(0)));
    }

    #[test]
    fn foreign_metric_does_not_overwrite_last_value() {
        let mut registry = DeviceRegistry::new();
        registry.observe(&did("hr-1"), MetricKind::HeartRate, 130.0, ts(0));
        registry.observe(&did("hr-1"), MetricKind::Cadence, 90.0, ts(1));
        assert_eq!(registry.get(&did("hr-1")).unwrap().last_value, Some(130.0));
    }
}
