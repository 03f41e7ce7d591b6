//! Group policy evaluation.
//!
//! Evaluation is a pure function over the roster's zone state. "Not yet
//! satisfied" is an ordinary result, not an error: callers decide what to do
//! with it (pause playback, show a prompt, ...).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, ZoneId};

/// How many active entities must satisfy the zone requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    /// Every active entity.
    All,
    /// At least this many entities.
    Count(u32),
    /// At least this percentage of active entities, rounded up.
    Percent(u8),
}

impl Quorum {
    /// Number of satisfying entities required out of `active`.
    pub fn required(&self, active: usize) -> usize {
        match *self {
            Self::All => active,
            Self::Count(n) => usize::try_from(n).unwrap_or(usize::MAX),
            Self::Percent(p) => (active * usize::from(p)).div_ceil(100),
        }
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Count(n) => write!(f, "count:{n}"),
            Self::Percent(p) => write!(f, "percent:{p}"),
        }
    }
}

impl FromStr for Quorum {
    type Err = InvalidQuorum;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidQuorum(s.to_string());
        match s.split_once(':') {
            None if s == "all" => Ok(Self::All),
            Some(("count", n)) => n.parse().map(Self::Count).map_err(|_| invalid()),
            Some(("percent", p)) => {
                let p: u8 = p.parse().map_err(|_| invalid())?;
                if p > 100 {
                    return Err(invalid());
                }
                Ok(Self::Percent(p))
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Quorum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quorum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for malformed quorum strings.
#[derive(Debug, Clone)]
pub struct InvalidQuorum(String);

impl fmt::Display for InvalidQuorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid quorum: {} (expected all, count:N or percent:P)",
            self.0
        )
    }
}

impl std::error::Error for InvalidQuorum {}

/// A group activity requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub min_rank: u32,
    pub quorum: Quorum,
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceResult {
    pub satisfied: bool,
    /// Number of active entities meeting the zone requirement.
    pub actual_count: usize,
    pub required_count: usize,
    /// Active entities not meeting the requirement, ordered by id.
    pub missing_entities: Vec<EntityId>,
}

/// Evaluates `policy` against the current zone state.
///
/// An active entity satisfies the policy only if it has a zone, and that zone
/// has a rank of at least `policy.min_rank`. A missing zone-map entry, a null
/// zone, or a zone without a rank all count as not satisfying.
pub fn evaluate(
    active_entities: &BTreeSet<EntityId>,
    entity_zones: &HashMap<EntityId, Option<ZoneId>>,
    zone_ranks: &HashMap<ZoneId, u32>,
    policy: &Policy,
) -> GovernanceResult {
    if active_entities.is_empty() {
        return GovernanceResult {
            satisfied: true,
            actual_count: 0,
            required_count: 0,
            missing_entities: Vec::new(),
        };
    }

    let (satisfying, missing): (Vec<&EntityId>, Vec<&EntityId>) =
        active_entities.iter().partition(|entity| {
            entity_zones
                .get(*entity)
                .and_then(Option::as_ref)
                .and_then(|zone| zone_ranks.get(zone))
                .is_some_and(|rank| *rank >= policy.min_rank)
        });

    let required_count = policy.quorum.required(active_entities.len());
    GovernanceResult {
        satisfied: satisfying.len() >= required_count,
        actual_count: satisfying.len(),
        required_count,
        missing_entities: missing.into_iter().cloned().collect(),
    }
}
