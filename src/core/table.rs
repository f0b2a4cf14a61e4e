//! Concurrent bucket table.
//!
//! Buckets live in a sharded [`DashMap`], so publishers only contend when
//! their keys hash to the same shard. Creation goes through the entry API,
//! which keeps exactly one live bucket per key even when several callers
//! race to create it. Flushing detaches buckets with `remove_if`, so a
//! bucket is either live in the table or owned by the flusher, never both.

use super::bucket::Bucket;
use super::key::{derive_key, window_ms, window_start, BucketKey};
use super::sample::validate_name;
use chrono::DateTime;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{trace, warn};

/// Default upper bound on live buckets.
pub const DEFAULT_MAX_BUCKETS: usize = 100_000;

/// What to do when a sample needs a new bucket and the table is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse samples for new keys; existing keys keep accumulating
    #[default]
    RejectNew,
    /// Discard the bucket with the oldest window to make room
    DropOldest,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "reject_new" => Ok(OverflowPolicy::RejectNew),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy '{other}'")),
        }
    }
}

/// Errors returned by [`AggregationTable::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The sample failed validation and was not recorded
    InvalidSample(String),
    /// The table is at its bucket limit and the policy rejects new keys
    TableFull { limit: usize },
    /// The publisher is shutting down
    ShutDown,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::InvalidSample(e) => write!(f, "Invalid sample: {e}"),
            PublishError::TableFull { limit } => {
                write!(f, "Bucket table is full ({limit} live buckets)")
            }
            PublishError::ShutDown => write!(f, "Publisher is shut down"),
        }
    }
}

impl std::error::Error for PublishError {}

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOutcome {
    /// Whether the sample opened a new bucket
    pub created: bool,
    /// Buckets discarded under [`OverflowPolicy::DropOldest`] to make room
    pub evicted: usize,
}

/// Mapping from bucket key to live bucket.
#[derive(Debug)]
pub struct AggregationTable {
    buckets: DashMap<BucketKey, Bucket>,
    window_minutes: u32,
    max_buckets: usize,
    overflow_policy: OverflowPolicy,
    /// Live buckets plus creations in flight; never exceeds `max_buckets`
    live: AtomicUsize,
}

impl AggregationTable {
    /// Create a table for the given window length with the default bound.
    pub fn new(window_minutes: u32) -> Self {
        Self::with_limit(window_minutes, DEFAULT_MAX_BUCKETS, OverflowPolicy::default())
    }

    /// Create a table with an explicit bucket bound and overflow policy.
    pub fn with_limit(
        window_minutes: u32,
        max_buckets: usize,
        overflow_policy: OverflowPolicy,
    ) -> Self {
        Self {
            buckets: DashMap::new(),
            window_minutes,
            max_buckets,
            overflow_policy,
            live: AtomicUsize::new(0),
        }
    }

    pub fn window_minutes(&self) -> u32 {
        self.window_minutes
    }

    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Number of buckets currently in the table. Creations that have
    /// reserved a slot but not yet inserted are not counted.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record one sample, creating its bucket on first sight.
    pub fn publish(
        &self,
        metric: &str,
        timestamp: i64,
        value: f64,
        tags: &HashMap<String, String>,
    ) -> Result<PublishOutcome, PublishError> {
        validate(metric, timestamp, value, tags)?;

        let (start, key) = derive_key(metric, timestamp, tags, self.window_minutes);
        trace!(%key, metric, timestamp, value, window_start = start, "storing sample");

        let mut evicted = 0;
        loop {
            // The slot is reserved under the shard lock, so a caller racing on
            // the same key waits here and then finds the bucket occupied.
            match self.buckets.entry(key) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().add(value);
                    return Ok(PublishOutcome {
                        created: false,
                        evicted,
                    });
                }
                Entry::Vacant(entry) => {
                    if self.try_reserve() {
                        trace!(%key, window_start = start, "adding new bucket");
                        let tags = tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                        let mut bucket = Bucket::new(metric, start, tags);
                        bucket.add(value);
                        entry.insert(bucket);
                        return Ok(PublishOutcome {
                            created: true,
                            evicted,
                        });
                    }
                }
            }

            // Table is full; the shard lock is released before evicting.
            match self.overflow_policy {
                OverflowPolicy::RejectNew => {
                    return Err(PublishError::TableFull {
                        limit: self.max_buckets,
                    })
                }
                OverflowPolicy::DropOldest => {
                    if !self.evict_oldest() {
                        return Err(PublishError::TableFull {
                            limit: self.max_buckets,
                        });
                    }
                    evicted += 1;
                }
            }
        }
    }

    /// Lazily detach every bucket whose window closed before `now`.
    ///
    /// A bucket is ready when `window_start + window <= floor(now)`. Keys are
    /// snapshotted up front; buckets created during the walk are skipped.
    pub fn flush_ready(&self, now: i64) -> FlushReady<'_> {
        let cutoff = window_start(now, self.window_minutes);
        let len = window_ms(self.window_minutes);
        let pending: Vec<BucketKey> = self
            .buckets
            .iter()
            .filter(|entry| entry.value().window_start().saturating_add(len) <= cutoff)
            .map(|entry| *entry.key())
            .collect();

        FlushReady {
            table: self,
            pending: pending.into_iter(),
            cutoff: Some(cutoff),
        }
    }

    /// Lazily detach every bucket regardless of window state.
    pub fn drain(&self) -> FlushReady<'_> {
        let pending: Vec<BucketKey> = self.buckets.iter().map(|entry| *entry.key()).collect();
        FlushReady {
            table: self,
            pending: pending.into_iter(),
            cutoff: None,
        }
    }

    fn is_closed(&self, bucket: &Bucket, cutoff: Option<i64>) -> bool {
        match cutoff {
            Some(cutoff) => {
                bucket
                    .window_start()
                    .saturating_add(window_ms(self.window_minutes))
                    <= cutoff
            }
            None => true,
        }
    }

    fn try_reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_buckets).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .buckets
            .iter()
            .min_by_key(|entry| entry.value().window_start())
            .map(|entry| *entry.key());

        match oldest.and_then(|key| self.buckets.remove(&key)) {
            Some((key, bucket)) => {
                self.release();
                warn!(
                    %key,
                    metric = bucket.metric(),
                    window_start = bucket.window_start(),
                    samples = bucket.sample_count(),
                    "bucket table full, dropping oldest bucket"
                );
                true
            }
            None => false,
        }
    }
}

/// Iterator over buckets detached by a flush.
///
/// Each bucket is removed from the table at the moment it is yielded;
/// dropping the iterator early leaves the remaining buckets live.
pub struct FlushReady<'a> {
    table: &'a AggregationTable,
    pending: std::vec::IntoIter<BucketKey>,
    cutoff: Option<i64>,
}

impl Iterator for FlushReady<'_> {
    type Item = Bucket;

    fn next(&mut self) -> Option<Bucket> {
        for key in self.pending.by_ref() {
            let removed = self
                .table
                .buckets
                .remove_if(&key, |_, bucket| self.table.is_closed(bucket, self.cutoff));
            if let Some((_, bucket)) = removed {
                self.table.release();
                return Some(bucket);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

fn validate(
    metric: &str,
    timestamp: i64,
    value: f64,
    tags: &HashMap<String, String>,
) -> Result<(), PublishError> {
    if !validate_name(metric) {
        return Err(PublishError::InvalidSample(format!(
            "invalid metric name '{metric}'"
        )));
    }
    if !value.is_finite() {
        return Err(PublishError::InvalidSample(format!(
            "non-finite value {value} for '{metric}'"
        )));
    }
    if DateTime::from_timestamp_millis(timestamp).is_none() {
        return Err(PublishError::InvalidSample(format!(
            "timestamp {timestamp} out of range"
        )));
    }
    for (k, v) in tags {
        if !validate_name(k) || !validate_name(v) {
            return Err(PublishError::InvalidSample(format!(
                "invalid tag '{k}={v}'"
            )));
        }
    }
    Ok(())
}
