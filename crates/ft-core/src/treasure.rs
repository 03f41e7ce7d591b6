//! Coin accumulation from heart-rate zone dwell time.
//!
//! # Algorithm
//!
//! Each entity has an accumulator holding its current zone and the time of its
//! last processed sample. On every sample:
//!
//! 1. The interval since the previous sample is awarded at the rate of the zone
//!    the entity was in during that interval. Intervals longer than the
//!    configured maximum gap earn nothing (the sensor was silent).
//! 2. If the new reading falls in a different zone, the dwell interval in the
//!    previous zone is closed and a new one starts at the sample time.
//!
//! Accumulators are opened only on behalf of the ledger; a sample for an entity
//! without one is reported as an unknown reference and ignored.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::types::{EntityId, ZoneId};
use crate::zone::ZoneProfile;

/// Per-entity reward state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accumulator {
    pub entity_id: EntityId,
    pub current_zone: Option<ZoneId>,
    /// Coins per second of `current_zone`, fixed when the zone was entered.
    pub current_rate: f64,
    pub last_sample_time: Option<DateTime<Utc>>,
    pub zone_dwell_start: Option<DateTime<Utc>>,
    pub total_coins: f64,
    pub last_heart_rate: Option<f64>,
    /// Awarded dwell time per zone.
    pub zone_time_ms: BTreeMap<ZoneId, i64>,
}

impl Accumulator {
    fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            current_zone: None,
            current_rate: 0.0,
            last_sample_time: None,
            zone_dwell_start: None,
            total_coins: 0.0,
            last_heart_rate: None,
            zone_time_ms: BTreeMap::new(),
        }
    }

    /// Awards the interval `[last_sample_time, until]` in the current zone.
    fn award_until(&mut self, until: DateTime<Utc>, max_gap: Duration) -> f64 {
        let Some(last) = self.last_sample_time else {
            return 0.0;
        };
        let elapsed = until - last;
        if elapsed <= Duration::zero() || elapsed > max_gap {
            return 0.0;
        }
        let Some(zone) = &self.current_zone else {
            return 0.0;
        };
        let elapsed_ms = elapsed.num_milliseconds();
        *self.zone_time_ms.entry(zone.clone()).or_insert(0) += elapsed_ms;
        let awarded = self.current_rate * elapsed_ms as f64 / 1000.0;
        self.total_coins += awarded;
        awarded
    }
}

/// Result of recording one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub zone: Option<ZoneId>,
    pub zone_changed: bool,
    pub awarded: f64,
}

/// Accumulates coins per session entity.
#[derive(Debug, Clone)]
pub struct TreasureBox {
    accumulators: HashMap<EntityId, Accumulator>,
    max_dwell_gap: Duration,
}

impl TreasureBox {
    pub fn new(max_dwell_gap: Duration) -> Self {
        Self {
            accumulators: HashMap::new(),
            max_dwell_gap,
        }
    }

    /// Opens a zeroed accumulator for a newly created entity.
    ///
    /// Opening an existing accumulator is a no-op.
    pub fn open(&mut self, entity_id: &EntityId) {
        self.accumulators
            .entry(entity_id.clone())
            .or_insert_with(|| Accumulator::new(entity_id.clone()));
    }

    /// Fails with `StaleSampleDiscarded` if `timestamp` is older than the
    /// entity's last processed sample.
    pub fn ensure_fresh(
        &self,
        entity_id: &EntityId,
        timestamp: DateTime<Utc>,
    ) -> Result<(), TrackingError> {
        let acc = self
            .accumulators
            .get(entity_id)
            .ok_or_else(|| TrackingError::UnknownEntityReference(entity_id.clone()))?;
        match acc.last_sample_time {
            Some(last) if timestamp < last => Err(TrackingError::StaleSampleDiscarded {
                entity_id: entity_id.clone(),
                timestamp,
                last_processed: last,
            }),
            _ => Ok(()),
        }
    }

    /// Records a heart-rate sample for an entity.
    pub fn record_sample(
        &mut self,
        entity_id: &EntityId,
        heart_rate: f64,
        zone_profile: &ZoneProfile,
        timestamp: DateTime<Utc>,
    ) -> Result<SampleOutcome, TrackingError> {
        self.ensure_fresh(entity_id, timestamp)?;
        let acc = self
            .accumulators
            .get_mut(entity_id)
            .ok_or_else(|| TrackingError::UnknownEntityReference(entity_id.clone()))?;

        let awarded = acc.award_until(timestamp, self.max_dwell_gap);

        let zone = zone_profile.zone_for(heart_rate).cloned();
        let zone_changed = zone != acc.current_zone;
        if zone_changed {
            if let (Some(previous), Some(started)) = (&acc.current_zone, acc.zone_dwell_start) {
                tracing::debug!(
                    entity_id = %entity_id,
                    zone = %previous,
                    dwell_ms = (timestamp - started).num_milliseconds(),
                    "zone dwell closed"
                );
            }
            acc.current_rate = zone.as_ref().map_or(0.0, |z| zone_profile.coin_rate(z));
            acc.current_zone.clone_from(&zone);
            acc.zone_dwell_start = zone.as_ref().map(|_| timestamp);
        }
        acc.last_sample_time = Some(timestamp);
        acc.last_heart_rate = Some(heart_rate);

        Ok(SampleOutcome {
            zone,
            zone_changed,
            awarded,
        })
    }

    /// Closes the open dwell interval at `now`.
    ///
    /// Used when an entity stops being active, so the time between its last
    /// sample and the moment it ended is not lost.
    pub fn settle(&mut self, entity_id: &EntityId, now: DateTime<Utc>) -> Result<f64, TrackingError> {
        let acc = self
            .accumulators
            .get_mut(entity_id)
            .ok_or_else(|| TrackingError::UnknownEntityReference(entity_id.clone()))?;
        acc.award_until(now, self.max_dwell_gap);
        if acc.last_sample_time.is_some_and(|last| last < now) {
            acc.last_sample_time = Some(now);
        }
        Ok(acc.total_coins)
    }

    /// Moves coins and open dwell state from one entity to another.
    ///
    /// The source keeps its accumulator but with zero coins, so live totals
    /// never count the same coins twice. If the target already has an
    /// accumulator, the source's coins are added to it.
    pub fn transfer_accumulator(
        &mut self,
        from: &EntityId,
        to: &EntityId,
    ) -> Result<f64, TrackingError> {
        let source = self
            .accumulators
            .get_mut(from)
            .ok_or_else(|| TrackingError::UnknownEntityReference(from.clone()))?;
        let mut moved = source.clone();
        source.total_coins = 0.0;
        source.current_zone = None;
        source.current_rate = 0.0;
        source.zone_dwell_start = None;
        source.zone_time_ms.clear();

        let coins = moved.total_coins;
        match self.accumulators.get_mut(to) {
            Some(target) => {
                target.total_coins += coins;
                for (zone, ms) in moved.zone_time_ms {
                    *target.zone_time_ms.entry(zone).or_insert(0) += ms;
                }
            }
            None => {
                moved.entity_id = to.clone();
                self.accumulators.insert(to.clone(), moved);
            }
        }
        tracing::debug!(from = %from, to = %to, coins, "accumulator transferred");
        Ok(coins)
    }

    pub fn accumulator(&self, entity_id: &EntityId) -> Option<&Accumulator> {
        self.accumulators.get(entity_id)
    }

    pub fn current_zone(&self, entity_id: &EntityId) -> Option<&ZoneId> {
        self.accumulators
            .get(entity_id)
            .and_then(|a| a.current_zone.as_ref())
    }

    pub fn total(&self, entity_id: &EntityId) -> Option<f64> {
        self.accumulators.get(entity_id).map(|a| a.total_coins)
    }

    /// Coin totals keyed by entity.
    pub fn entity_totals(&self) -> BTreeMap<EntityId, f64> {
        self.accumulators
            .iter()
            .map(|(id, acc)| (id.clone(), acc.total_coins))
            .collect()
    }
}
