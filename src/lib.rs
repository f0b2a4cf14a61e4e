//! tsdb-rollup - time-windowed averaging for metric streams.
//!
//! This library sits between a high-frequency metric source and a
//! time-series store. It collapses every sample that shares a metric,
//! tag set and window into one averaged data point, cutting write volume
//! by the number of samples per window.
//!
//! # Guarantees
//!
//! - **One bucket per key**: concurrent publishers for the same metric,
//!   window and tag set always update a single accumulator
//! - **Order-independent tags**: tag sets are canonicalized before keying
//! - **No early flush**: a window is only emitted once it has fully closed
//! - **Clean drain**: `shutdown` hands every in-memory bucket to the sink
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RollupPublisher                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  publish ─▶ ┌───────────┐   ┌──────────────────┐             │
//! │             │ derive_key│──▶│ AggregationTable │             │
//! │             └───────────┘   │ (sharded buckets)│             │
//! │                             └────────┬─────────┘             │
//! │                                      │ flush_ready / drain   │
//! │                                      ▼                       │
//! │  ┌─────────────┐            ┌──────────────────┐   ┌──────┐  │
//! │  │ RollupStats │◀───────────│  FlushScheduler  │──▶│ Sink │  │
//! │  └─────────────┘            └──────────────────┘   └──────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tsdb_rollup::{config::Config, sink::LogSink, RollupPublisher};
//!
//! let publisher = RollupPublisher::initialize(Config::default(), Arc::new(LogSink))
//!     .expect("valid configuration");
//!
//! let mut tags = HashMap::new();
//! tags.insert("host".to_string(), "a".to_string());
//! publisher.publish("cpu.load", 1_000, 2.0, &tags).unwrap();
//!
//! // Drain everything still in memory to the sink.
//! publisher.shutdown();
//! ```

pub mod config;
pub mod core;
pub mod publisher;
pub mod sink;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    AggregationTable, Bucket, BucketError, BucketKey, FlushReport, OverflowPolicy, PublishError,
    RolledUpSample, Sample, Tags,
};
pub use publisher::RollupPublisher;
pub use sink::{ChannelSink, LogSink, RollupSink, SharedSink, SinkError};
pub use stats::{RollupStats, SharedStats, StatsSnapshot};

#[cfg(feature = "http-sink")]
pub use sink::{HttpSink, HttpSinkConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
