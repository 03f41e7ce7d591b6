//! Fixed-interval time series for charting and audit.
//!
//! Every registered series advances exactly one slot per tick. Slots without a
//! sample hold `None`, so "no data" is never confused with a zero reading, and
//! series registered late are back-filled so all series stay index-aligned.
//!
//! Writes are staged and only become visible when the tick that contains them
//! is flushed; readers never observe a partially written tick.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::types::{DeviceId, EntityId, ProfileId};

/// What a series is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Keyed by entity id.
    Entity,
    /// Keyed by device id.
    Device,
    /// Keyed by profile id.
    User,
    /// Keyed by a fixed session-wide name.
    Global,
}

impl Scope {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Device => "device",
            Self::User => "user",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = InvalidSeriesKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity" => Ok(Self::Entity),
            "device" => Ok(Self::Device),
            "user" => Ok(Self::User),
            "global" => Ok(Self::Global),
            _ => Err(InvalidSeriesKey(s.to_string())),
        }
    }
}

/// The `scope:id` prefix shared by all metrics of one owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesOwner {
    pub scope: Scope,
    pub id: String,
}

impl SeriesOwner {
    pub fn entity(id: &EntityId) -> Self {
        Self {
            scope: Scope::Entity,
            id: id.as_str().to_string(),
        }
    }

    pub fn device(id: &DeviceId) -> Self {
        Self {
            scope: Scope::Device,
            id: id.as_str().to_string(),
        }
    }

    pub fn user(id: &ProfileId) -> Self {
        Self {
            scope: Scope::User,
            id: id.as_str().to_string(),
        }
    }

    pub fn global(name: &str) -> Self {
        Self {
            scope: Scope::Global,
            id: name.to_string(),
        }
    }

    pub fn metric(&self, metric: &str) -> SeriesKey {
        SeriesKey {
            owner: self.clone(),
            metric: metric.to_string(),
        }
    }
}

impl fmt::Display for SeriesOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.id)
    }
}

/// Series identifier of the form `scope:id:metric`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub owner: SeriesOwner,
    pub metric: String,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.metric)
    }
}

impl FromStr for SeriesKey {
    type Err = InvalidSeriesKey;

    /// Parses `scope:id:metric`. The id may itself contain `:`; the metric is
    /// everything after the last separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSeriesKey(s.to_string());
        let (scope, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (id, metric) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if id.is_empty() || metric.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            owner: SeriesOwner {
                scope: scope.parse().map_err(|_| invalid())?,
                id: id.to_string(),
            },
            metric: metric.to_string(),
        })
    }
}

impl Serialize for SeriesKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SeriesKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for malformed series keys.
#[derive(Debug, Clone)]
pub struct InvalidSeriesKey(String);

impl fmt::Display for InvalidSeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid series key: {}", self.0)
    }
}

impl std::error::Error for InvalidSeriesKey {}

/// One exported series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesExport {
    pub key: SeriesKey,
    pub values: Vec<Option<f64>>,
}

/// Append-only store of tick-aligned series.
#[derive(Debug, Clone, Default)]
pub struct FitnessTimeline {
    series: BTreeMap<SeriesKey, Vec<Option<f64>>>,
    staged: HashMap<SeriesKey, f64>,
    redirects: HashMap<SeriesOwner, SeriesOwner>,
    predecessors: HashMap<SeriesOwner, SeriesOwner>,
    ticks: u64,
}

impl FitnessTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ticks flushed so far; also the length of every series.
    pub const fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Stages a value for the next tick boundary. Later writes in the same
    /// interval replace earlier ones; non-finite values are ignored.
    pub fn assign_metric(&mut self, owner: &SeriesOwner, metric: &str, value: f64) {
        if !value.is_finite() {
            return;
        }
        let key = self.resolve(owner).metric(metric);
        self.staged.insert(key, value);
    }

    /// Registers a series without writing to it, so it starts receiving `None`.
    pub fn register(&mut self, key: SeriesKey) {
        let ticks = self.slot_count();
        self.series
            .entry(key)
            .or_insert_with(|| vec![None; ticks]);
    }

    /// Flushes the staged writes as tick `index`.
    ///
    /// Every registered series receives exactly one value (or `None`).
    pub fn tick(&mut self, index: u64) -> Result<(), TrackingError> {
        if index != self.ticks {
            return Err(TrackingError::TickOutOfOrder {
                expected: self.ticks,
                actual: index,
            });
        }

        let ticks = self.slot_count();
        for key in self.staged.keys() {
            if !self.series.contains_key(key) {
                self.series.insert(key.clone(), vec![None; ticks]);
            }
        }

        for (key, values) in &mut self.series {
            values.push(self.staged.remove(key));
        }
        self.ticks += 1;
        Ok(())
    }

    /// Re-homes future writes for `from` onto `to`.
    ///
    /// History already written under `from` stays there; nothing is copied.
    pub fn transfer_series(&mut self, from: &SeriesOwner, to: &SeriesOwner) {
        if from == to {
            return;
        }
        self.redirects.insert(from.clone(), to.clone());
        self.predecessors.insert(to.clone(), from.clone());
    }

    /// Owner whose series now receive writes addressed to `owner`.
    pub fn resolve(&self, owner: &SeriesOwner) -> SeriesOwner {
        let mut current = owner;
        // Chains are bounded by the number of redirects; a cycle cannot form
        // because targets are always freshly created entities.
        for _ in 0..=self.redirects.len() {
            match self.redirects.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    /// Owner whose history continues under `owner`, if any.
    pub fn predecessor(&self, owner: &SeriesOwner) -> Option<&SeriesOwner> {
        self.predecessors.get(owner)
    }

    pub fn get(&self, key: &SeriesKey) -> Option<&[Option<f64>]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.series.keys()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// All series, ordered by key.
    pub fn export(&self) -> Vec<SeriesExport> {
        self.series
            .iter()
            .map(|(key, values)| SeriesExport {
                key: key.clone(),
                values: values.clone(),
            })
            .collect()
    }

    fn slot_count(&self) -> usize {
        usize::try_from(self.ticks).unwrap_or(usize::MAX)
    }
}
