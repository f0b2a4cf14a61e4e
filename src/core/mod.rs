//! Core aggregation engine.
//!
//! This module contains:
//! - Bucket key derivation (window flooring and canonical tag strings)
//! - The per-key accumulator
//! - The concurrent bucket table
//! - Flush scheduling

pub mod bucket;
pub mod key;
pub mod sample;
pub mod scheduler;
pub mod table;

// Re-export commonly used types
pub use bucket::{Bucket, BucketError};
pub use key::{canonical_tag_string, derive_key, window_start, BucketKey};
pub use sample::{RolledUpSample, Sample, Tags};
pub use scheduler::{FlushReport, FlushScheduler, Flusher};
pub use table::{AggregationTable, FlushReady, OverflowPolicy, PublishError, PublishOutcome};
