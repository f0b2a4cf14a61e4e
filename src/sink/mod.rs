//! Downstream sinks for rolled-up samples.
//!
//! The engine treats a sink as non-transactional: each rollup is emitted
//! once, and a failed emit is logged and the rollup dropped.

#[cfg(feature = "http-sink")]
pub mod http;

use crate::core::key::canonical_tag_string;
use crate::core::RolledUpSample;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;

#[cfg(feature = "http-sink")]
pub use http::{HttpSink, HttpSinkConfig};

/// Errors a sink can report for a single emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink cannot accept more rollups right now
    Full,
    /// The sink's receiving side has gone away
    Disconnected,
    /// Transport-level failure
    Network(String),
    /// The downstream store rejected the write
    Rejected { status: u16, message: String },
    /// The rollup could not be encoded
    Serialization(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Full => write!(f, "Sink is full"),
            SinkError::Disconnected => write!(f, "Sink is disconnected"),
            SinkError::Network(msg) => write!(f, "Sink network error: {msg}"),
            SinkError::Rejected { status, message } => {
                write!(f, "Sink rejected write ({status}): {message}")
            }
            SinkError::Serialization(msg) => write!(f, "Sink serialization error: {msg}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Consumer of rolled-up samples.
pub trait RollupSink: Send + Sync {
    /// Hand one rollup downstream.
    fn emit(&self, rollup: &RolledUpSample) -> Result<(), SinkError>;
}

/// Thread-safe shared sink.
pub type SharedSink = Arc<dyn RollupSink>;

/// Sink that only logs each rollup.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl RollupSink for LogSink {
    fn emit(&self, rollup: &RolledUpSample) -> Result<(), SinkError> {
        tracing::info!(
            metric = %rollup.rollup_metric(),
            window_start = rollup.window_start,
            tags = %canonical_tag_string(&rollup.tags),
            samples = rollup.sample_count,
            avg = rollup.average,
            "rollup"
        );
        Ok(())
    }
}

/// Sink that forwards rollups into a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<RolledUpSample>,
}

impl ChannelSink {
    /// Create a sink and the receiver its rollups arrive on.
    pub fn bounded(capacity: usize) -> (Self, Receiver<RolledUpSample>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }

    pub fn new(sender: Sender<RolledUpSample>) -> Self {
        Self { sender }
    }
}

impl RollupSink for ChannelSink {
    fn emit(&self, rollup: &RolledUpSample) -> Result<(), SinkError> {
        self.sender.try_send(rollup.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Disconnected(_) => SinkError::Disconnected,
        })
    }
}
