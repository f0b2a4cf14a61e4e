//! Bucket key derivation.
//!
//! A sample maps to exactly one bucket per window. The key is a 128-bit
//! xxh3 digest of the metric, the floored window start and the canonical
//! (key-sorted) tag string, so tag maps that differ only in iteration
//! order land in the same bucket.

use std::collections::HashMap;
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// Milliseconds in one minute.
pub const MINUTE_MS: i64 = 60_000;

/// Separator between tag pairs in the canonical tag string.
pub const TAG_DELIMITER: char = ',';

/// Deterministic 128-bit identifier of a (metric, window, tags) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(u128);

impl BucketKey {
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Length of a window in milliseconds.
pub fn window_ms(window_minutes: u32) -> i64 {
    i64::from(window_minutes) * MINUTE_MS
}

/// Floor `timestamp` to the start of its window, rounding toward negative
/// infinity so pre-epoch timestamps still land on a window boundary.
///
/// Saturates at `i64::MIN` for timestamps whose window would start below it.
pub fn window_start(timestamp: i64, window_minutes: u32) -> i64 {
    let len = window_ms(window_minutes);
    timestamp.div_euclid(len).saturating_mul(len)
}

/// Render tags as `k1=v1,k2=v2` with keys in lexicographic order.
pub fn canonical_tag_string<'a, I>(tags: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut pairs: Vec<(&String, &String)> = tags.into_iter().collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut out = String::new();
    for (i, (k, v)) in pairs.into_iter().enumerate() {
        if i > 0 {
            out.push(TAG_DELIMITER);
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Derive `(window_start, key)` for a sample.
pub fn derive_key(
    metric: &str,
    timestamp: i64,
    tags: &HashMap<String, String>,
    window_minutes: u32,
) -> (i64, BucketKey) {
    let start = window_start(timestamp, window_minutes);
    let tag_string = canonical_tag_string(tags);

    let mut hasher = Xxh3::new();
    hasher.update(metric.as_bytes());
    hasher.update(&[0]);
    hasher.update(&start.to_le_bytes());
    hasher.update(tag_string.as_bytes());

    (start, BucketKey(hasher.digest128()))
}
