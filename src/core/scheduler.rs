//! Flush scheduling.
//!
//! A single background thread wakes every flush period, detaches the
//! buckets whose window has closed and hands their rollups to the sink.
//! Stopping the scheduler is synchronous; the caller then runs a forced
//! drain so nothing in memory is silently lost.

use super::bucket::Bucket;
use super::table::AggregationTable;
use crate::sink::SharedSink;
use crate::stats::SharedStats;
use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Rollups the sink accepted
    pub emitted: usize,
    /// Rollups dropped after a failure
    pub failed: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.emitted + self.failed
    }
}

/// Finalizes detached buckets and hands them to the sink.
pub struct Flusher {
    table: Arc<AggregationTable>,
    sink: SharedSink,
    stats: SharedStats,
}

impl Flusher {
    pub fn new(table: Arc<AggregationTable>, sink: SharedSink, stats: SharedStats) -> Self {
        Self { table, sink, stats }
    }

    /// Flush every bucket whose window closed before `now` (epoch ms).
    pub fn flush_at(&self, now: i64) -> FlushReport {
        let report = self.emit_all(self.table.flush_ready(now));
        debug!(
            now,
            emitted = report.emitted,
            failed = report.failed,
            live = self.table.len(),
            "flush pass complete"
        );
        report
    }

    /// Flush every bucket regardless of window state.
    pub fn force_flush(&self) -> FlushReport {
        let report = self.emit_all(self.table.drain());
        debug!(
            emitted = report.emitted,
            failed = report.failed,
            "forced flush complete"
        );
        report
    }

    fn emit_all(&self, buckets: impl Iterator<Item = Bucket>) -> FlushReport {
        let window_minutes = self.table.window_minutes();
        let mut report = FlushReport::default();

        for bucket in buckets {
            let metric = bucket.metric().to_string();
            let window_start = bucket.window_start();

            let rollup = match bucket.into_rollup(window_minutes) {
                Ok(rollup) => rollup,
                Err(e) => {
                    warn!(%metric, window_start, "dropping bucket: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            match self.sink.emit(&rollup) {
                Ok(()) => report.emitted += 1,
                Err(e) => {
                    warn!(
                        %metric,
                        window_start,
                        avg = rollup.average,
                        "sink rejected rollup, dropping it: {e}"
                    );
                    report.failed += 1;
                }
            }
        }

        self.stats.record_flush_pass();
        self.stats.record_flushed(report.emitted as u64);
        self.stats.record_emit_failures(report.failed as u64);
        report
    }
}

/// Handle to the background flush thread.
pub struct FlushScheduler {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl FlushScheduler {
    /// Start flushing every `period` on a dedicated thread.
    pub fn spawn(flusher: Arc<Flusher>, period: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("rollup-flush".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        flusher.flush_at(Utc::now().timestamp_millis());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
            period,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and wait for any in-progress pass to finish.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(());
            if handle.join().is_err() {
                warn!("flush thread panicked");
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
