//! Metric kinds as the single source of truth for metric strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of measurement a sensor reports.
///
/// A device's kind is the metric of the first sample it reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    HeartRate,
    Cadence,
    Power,
}

impl MetricKind {
    /// String representation used in series keys and storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HeartRate => "heart_rate",
            Self::Cadence => "cadence",
            Self::Power => "power",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heart_rate" | "heartrate" | "hr" => Ok(Self::HeartRate),
            "cadence" | "rpm" => Ok(Self::Cadence),
            "power" => Ok(Self::Power),
            _ => Err(UnknownMetric(s.to_string())),
        }
    }
}

impl Serialize for MetricKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown metric strings.
#[derive(Debug, Clone)]
pub struct UnknownMetric(String);

impl fmt::Display for UnknownMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown metric: {}", self.0)
    }
}

impl std::error::Error for UnknownMetric {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_variants() {
        for variant in [MetricKind::HeartRate, MetricKind::Cadence, MetricKind::Power] {
            let parsed: MetricKind = variant.to_string().parse().expect("should parse");
            assert_eq!(parsed, variant, "roundtrip failed for {variant:?}");
        }
    }

    #[test]
    fn short_aliases_parse() {
        assert_eq!("hr".parse::<MetricKind>().unwrap(), MetricKind::HeartRate);
        assert_eq!("rpm".parse::<MetricKind>().unwrap(), MetricKind::Cadence);
    }

    #[test]
    fn unknown_metric_errors() {
        let err = "speed".parse::<MetricKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown metric: speed");
    }

    #[test]
    fn deserializes_from_wire_string() {
        let metric: MetricKind = serde_json::from_str("\"cadence\"").unwrap();
        assert_eq!(metric, MetricKind::Cadence);
        assert!(serde_json::from_str::<MetricKind>("\"speed\"").is_err());
    }
}
