//! Heart-rate zones, per-profile zone bands, and the ranked zone table.
//!
//! Zone membership uses lower thresholds only: a band extends from its own
//! `min_bpm` up to the next band's `min_bpm`, so a reading exactly on a
//! boundary belongs to the higher band. `max_bpm` is carried for display.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::ZoneId;

/// One heart-rate band of a zone profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneBand {
    pub zone_id: ZoneId,
    pub min_bpm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bpm: Option<f64>,
}

/// Per-profile zone thresholds and optional coin-rate overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneProfile {
    pub bands: Vec<ZoneBand>,
    /// Coins per second, keyed by zone. Zones missing here fall back to the
    /// session's zone table (see [`ZoneProfile::with_fallback_rates`]).
    #[serde(default)]
    pub coin_rates: BTreeMap<ZoneId, f64>,
}

impl ZoneProfile {
    /// Creates a profile from bands in any order.
    pub fn new(mut bands: Vec<ZoneBand>, coin_rates: BTreeMap<ZoneId, f64>) -> Self {
        bands.sort_by(|a, b| a.min_bpm.total_cmp(&b.min_bpm));
        Self { bands, coin_rates }
    }

    /// Returns the zone a heart rate falls into.
    ///
    /// Non-positive or non-finite readings (sensor lost contact) and readings
    /// below the lowest band have no zone.
    pub fn zone_for(&self, heart_rate: f64) -> Option<&ZoneId> {
        if !heart_rate.is_finite() || heart_rate <= 0.0 {
            return None;
        }
        self.bands
            .iter()
            .filter(|band| band.min_bpm <= heart_rate)
            .max_by(|a, b| a.min_bpm.total_cmp(&b.min_bpm))
            .map(|band| &band.zone_id)
    }

    /// Coins per second earned while dwelling in `zone`. Unrated zones earn nothing.
    pub fn coin_rate(&self, zone: &ZoneId) -> f64 {
        self.coin_rates.get(zone).copied().unwrap_or(0.0)
    }

    /// Returns a copy whose missing coin rates are filled from the zone table.
    #[must_use]
    pub fn with_fallback_rates(&self, table: &ZoneTable) -> Self {
        let mut resolved = self.clone();
        for zone in &table.zones {
            resolved
                .coin_rates
                .entry(zone.id.clone())
                .or_insert(zone.coins_per_second);
        }
        resolved
    }
}

/// One entry of the ranked zone table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneDefinition {
    pub id: ZoneId,
    #[serde(default)]
    pub coins_per_second: f64,
}

/// Ordered zone table; position in the table is the zone's rank (0 = lowest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneTable {
    pub zones: Vec<ZoneDefinition>,
}

impl ZoneTable {
    /// Rank of a zone, or `None` if the zone is not in the table.
    pub fn rank(&self, zone: &ZoneId) -> Option<u32> {
        self.zones
            .iter()
            .position(|z| &z.id == zone)
            .and_then(|idx| u32::try_from(idx).ok())
    }

    /// Zone id → rank lookup for governance evaluation.
    pub fn rank_map(&self) -> HashMap<ZoneId, u32> {
        self.zones
            .iter()
            .enumerate()
            .filter_map(|(idx, z)| u32::try_from(idx).ok().map(|rank| (z.id.clone(), rank)))
            .collect()
    }

    /// Default coins per second for a zone.
    pub fn coin_rate(&self, zone: &ZoneId) -> f64 {
        self.zones
            .iter()
            .find(|z| &z.id == zone)
            .map_or(0.0, |z| z.coins_per_second)
    }
}

impl Default for ZoneTable {
    /// cool / active / warm / hot / fire, with warm earning 1 coin per 10s and
    /// each hotter zone one more.
    fn default() -> Self {
        let zone = |id: &'static str, coins_per_second: f64| ZoneDefinition {
            id: ZoneId::from_static(id),
            coins_per_second,
        };
        Self {
            zones: vec![
                zone("cool", 0.0),
                zone("active", 0.0),
                zone("warm", 0.1),
                zone("hot", 0.2),
                zone("fire", 0.3),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zid(s: &str) -> ZoneId {
        ZoneId::new(s).unwrap()
    }

    fn band(zone: &str, min: f64) -> ZoneBand {
        ZoneBand {
            zone_id: zid(zone),
            min_bpm: min,
            max_bpm: None,
        }
    }

    fn profile() -> ZoneProfile {
        ZoneProfile::new(
            vec![
                band("hot", 150.0),
                band("cool", 60.0),
                band("warm", 130.0),
                band("active", 100.0),
                band("fire", 170.0),
            ],
            BTreeMap::new(),
        )
    }

    #[test]
    fn bands_are_sorted_on_construction() {
        let p = profile();
        let mins: Vec<f64> = p.bands.iter().map(|b| b.min_bpm).collect();
        assert_eq!(mins, vec![60.0, 100.0, 130.0, 150.0, 170.0]);
    }

    #[test]
    fn boundary_value_belongs_to_higher_zone() {
        let p = profile();
        assert_eq!(p.zone_for(150.0), Some(&zid("hot")));
        assert_eq!(p.zone_for(149.9), Some(&zid("warm")));
    }

    #[test]
    fn readings_outside_bands_have_no_zone() {
        let p = profile();
        assert_eq!(p.zone_for(40.0), None);
        assert_eq!(p.zone_for(0.0), None);
        assert_eq!(p.zone_for(f64::NAN), None);
        assert_eq!(p.zone_for(220.0), Some(&zid("fire")));
    }

    #[test]
    fn fallback_rates_fill_only_missing_zones() {
        let mut p = profile();
        p.coin_rates.insert(zid("hot"), 1.0);
        let resolved = p.with_fallback_rates(&ZoneTable::default());
        assert!((resolved.coin_rate(&zid("hot")) - 1.0).abs() < f64::EPSILON);
        assert!((resolved.coin_rate(&zid("warm")) - 0.1).abs() < f64::EPSILON);
        assert!(resolved.coin_rate(&zid("unknown")).abs() < f64::EPSILON);
    }

    #[test]
    fn default_table_ranks_in_order() {
        let table = ZoneTable::default();
        assert_eq!(table.rank(&zid("cool")), Some(0));
        assert_eq!(table.rank(&zid("fire")), Some(4));
        assert_eq!(table.rank(&zid("lava")), None);
        assert_eq!(table.rank_map().len(), 5);
    }

    #[test]
    fn zone_profile_deserializes_camel_case() {
        let json = r#"{
            "bands": [{"zoneId": "warm", "minBpm": 120, "maxBpm": 140}],
            "coinRates": {"warm": 0.5}
        }"#;
        let p: ZoneProfile = serde_json::from_str(json).unwrap();
        assert_eq!(p.bands[0].max_bpm, Some(140.0));
        assert!((p.coin_rate(&zid("warm")) - 0.5).abs() < f64::EPSILON);
    }
}
