//! Sample types crossing the ingestion and sink boundaries.
//!
//! Raw samples carry one observation; rolled-up samples carry the mean of
//! every observation that fell into one closed window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tag set as stored inside buckets and rollups (ordered by key).
pub type Tags = BTreeMap<String, String>;

/// A single timestamped observation as submitted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Metric name, e.g. `cpu.load`
    pub metric: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Observed value
    pub value: f64,
    /// Attribute set; key order is irrelevant
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Sample {
    pub fn new(
        metric: impl Into<String>,
        timestamp: i64,
        value: f64,
        tags: HashMap<String, String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
            tags,
        }
    }
}

/// The averaged value of one closed bucket, handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolledUpSample {
    /// Metric name as published
    pub metric: String,
    /// Start of the window in milliseconds since the Unix epoch
    pub window_start: i64,
    /// Canonically ordered tags
    pub tags: Tags,
    /// Arithmetic mean of every sample in the window
    pub average: f64,
    /// Number of samples that contributed to the average
    pub sample_count: u64,
    /// Window length in minutes
    pub window_minutes: u32,
}

impl RolledUpSample {
    /// Metric name used when writing the rollup back to storage.
    pub fn rollup_metric(&self) -> String {
        format!("{}.{}m-avg", self.metric, self.window_minutes)
    }

    /// Window start as a UTC date-time.
    pub fn window_start_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.window_start)
    }
}

/// Check a metric name, tag key or tag value against the OpenTSDB rule:
/// non-empty, alphanumerics (any script) plus `-`, `_`, `.` and `/`.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}
