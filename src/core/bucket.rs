//! Running accumulator for one (metric, window, tags) triple.

use super::sample::{RolledUpSample, Tags};

/// Errors produced when finalizing a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    /// The bucket never received a sample
    EmptyBucket,
}

impl std::fmt::Display for BucketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BucketError::EmptyBucket => write!(f, "Bucket has no samples"),
        }
    }
}

impl std::error::Error for BucketError {}

/// Sum and count of every sample seen for one key in one window.
#[derive(Debug, Clone)]
pub struct Bucket {
    metric: String,
    window_start: i64,
    tags: Tags,
    sample_count: u64,
    sum: f64,
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new(metric: impl Into<String>, window_start: i64, tags: Tags) -> Self {
        Self {
            metric: metric.into(),
            window_start,
            tags,
            sample_count: 0,
            sum: 0.0,
        }
    }

    /// Fold one value into the running totals.
    pub fn add(&mut self, value: f64) {
        self.sample_count += 1;
        self.sum += value;
    }

    /// Arithmetic mean of every added value.
    pub fn average(&self) -> Result<f64, BucketError> {
        if self.sample_count == 0 {
            return Err(BucketError::EmptyBucket);
        }
        Ok(self.sum / self.sample_count as f64)
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Consume the bucket and produce its rollup.
    pub fn into_rollup(self, window_minutes: u32) -> Result<RolledUpSample, BucketError> {
        let average = self.average()?;
        Ok(RolledUpSample {
            metric: self.metric,
            window_start: self.window_start,
            tags: self.tags,
            average,
            sample_count: self.sample_count,
            window_minutes,
        })
    }
}
