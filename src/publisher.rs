//! Public entry point consumed by the hosting process.
//!
//! [`RollupPublisher`] ties the bucket table, the flush scheduler, the sink
//! and the statistics together behind the host lifecycle:
//! `initialize` → `publish`* → `shutdown`, with `collect_stats` at any time.

use crate::config::{Config, ConfigError};
use crate::core::{
    AggregationTable, FlushReport, FlushScheduler, Flusher, PublishError, Sample,
};
use crate::sink::SharedSink;
use crate::stats::{RollupStats, SharedStats, StatsSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Time-windowed averaging publisher.
pub struct RollupPublisher {
    config: Config,
    table: Arc<AggregationTable>,
    flusher: Arc<Flusher>,
    stats: SharedStats,
    scheduler: Mutex<Option<FlushScheduler>>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
}

impl RollupPublisher {
    /// Validate `config`, build the table and start the flush thread.
    pub fn initialize(config: Config, sink: SharedSink) -> Result<Self, ConfigError> {
        Self::initialize_with_stats(config, sink, Arc::new(RollupStats::new()))
    }

    /// Like [`initialize`](Self::initialize), reusing existing statistics.
    pub fn initialize_with_stats(
        config: Config,
        sink: SharedSink,
        stats: SharedStats,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let table = Arc::new(AggregationTable::with_limit(
            config.window_size_minutes,
            config.max_buckets,
            config.overflow_policy,
        ));
        let flusher = Arc::new(Flusher::new(Arc::clone(&table), sink, Arc::clone(&stats)));

        let period = config.effective_flush_interval();
        let scheduler = FlushScheduler::spawn(Arc::clone(&flusher), period)
            .map_err(|e| ConfigError::IoError(format!("Failed to start flush thread: {e}")))?;

        info!(
            window_minutes = config.window_size_minutes,
            flush_interval_secs = period.as_secs_f64(),
            max_buckets = config.max_buckets,
            overflow_policy = ?config.overflow_policy,
            "rollup publisher initialized"
        );

        Ok(Self {
            config,
            table,
            flusher,
            stats,
            scheduler: Mutex::new(Some(scheduler)),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Record one sample. Fire-and-forget apart from validation and
    /// capacity errors; the sample is aggregated into its window's bucket.
    pub fn publish(
        &self,
        metric: &str,
        timestamp: i64,
        value: f64,
        tags: &HashMap<String, String>,
    ) -> Result<(), PublishError> {
        let _guard = InFlight::enter(&self.in_flight);
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::ShutDown);
        }

        match self.table.publish(metric, timestamp, value, tags) {
            Ok(outcome) => {
                self.stats.record_published();
                if outcome.created {
                    self.stats.record_bucket_created();
                }
                if outcome.evicted > 0 {
                    self.stats.record_evicted(outcome.evicted as u64);
                }
                Ok(())
            }
            Err(e) => {
                self.stats.record_rejected();
                debug!(metric, timestamp, "sample rejected: {e}");
                Err(e)
            }
        }
    }

    /// Record a [`Sample`].
    pub fn publish_sample(&self, sample: &Sample) -> Result<(), PublishError> {
        self.publish(&sample.metric, sample.timestamp, sample.value, &sample.tags)
    }

    /// Run a regular flush pass as of `now` (epoch ms).
    pub fn flush_at(&self, now: i64) -> FlushReport {
        self.flusher.flush_at(now)
    }

    /// Stop the flush thread, drain every remaining bucket to the sink and
    /// persist statistics. Later publishes fail with [`PublishError::ShutDown`].
    ///
    /// Only the first call drains; subsequent calls return an empty report.
    pub fn shutdown(&self) -> FlushReport {
        if self.closed.swap(true, Ordering::SeqCst) {
            return FlushReport::default();
        }

        // Wait out publishes that passed the closed check before the swap.
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            std::thread::yield_now();
        }

        let scheduler = match self.scheduler.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut scheduler) = scheduler {
            scheduler.stop();
        }

        let report = self.flusher.force_flush();
        if let Err(e) = self.stats.save() {
            warn!("Could not save rollup stats: {e}");
        }

        info!(
            emitted = report.emitted,
            failed = report.failed,
            "rollup publisher shut down"
        );
        report
    }

    /// Read-only statistics, including the current live bucket count.
    pub fn collect_stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.table.len())
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn version(&self) -> &'static str {
        crate::VERSION
    }
}

impl Drop for RollupPublisher {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let live = self.table.len();
            if live > 0 {
                warn!(
                    live_buckets = live,
                    "rollup publisher dropped without shutdown, discarding live buckets"
                );
            }
        }
    }
}

/// Counts a publish as in progress for as long as it is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, LogSink};
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            flush_interval: Some(Duration::from_secs(3600)),
            data_path: std::env::temp_dir().join("tsdb-rollup-publisher-test"),
            ..Config::default()
        }
    }

    #[test]
    fn test_initialize_rejects_zero_window() {
        let config = Config {
            window_size_minutes: 0,
            ..test_config()
        };
        let result = RollupPublisher::initialize(config, Arc::new(LogSink));
        assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_publish_after_shutdown_fails() {
        let publisher = RollupPublisher::initialize(test_config(), Arc::new(LogSink)).unwrap();
        publisher.shutdown();

        assert!(publisher.is_shut_down());
        assert_eq!(
            publisher.publish("m", 0, 1.0, &HashMap::new()),
            Err(PublishError::ShutDown)
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (sink, receiver) = ChannelSink::bounded(8);
        let publisher = RollupPublisher::initialize(test_config(), Arc::new(sink)).unwrap();
        publisher.publish("m", 0, 1.0, &HashMap::new()).unwrap();

        assert_eq!(publisher.shutdown().emitted, 1);
        assert_eq!(publisher.shutdown(), FlushReport::default());
        assert_eq!(receiver.len(), 1);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_drop_without_shutdown_warns() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let (sink, receiver) = ChannelSink::bounded(8);
        let publisher = RollupPublisher::initialize(test_config(), Arc::new(sink)).unwrap();
        publisher.publish("m", 0, 1.0, &HashMap::new()).unwrap();
        publisher.publish("n", 0, 1.0, &HashMap::new()).unwrap();

        tracing::subscriber::with_default(subscriber, || drop(publisher));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("dropped without shutdown"));
        assert!(output.contains("live_buckets=2"));
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_drop_after_shutdown_is_quiet() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let publisher = RollupPublisher::initialize(test_config(), Arc::new(LogSink)).unwrap();
        publisher.publish("m", 0, 1.0, &HashMap::new()).unwrap();
        publisher.shutdown();

        tracing::subscriber::with_default(subscriber, || drop(publisher));
        assert!(!String::from_utf8(logs.0.lock().unwrap().clone())
            .unwrap()
            .contains("dropped without shutdown"));
    }

    #[test]
    fn test_collect_stats_tracks_live_buckets() {
        let publisher = RollupPublisher::initialize(test_config(), Arc::new(LogSink)).unwrap();
        publisher.publish("a", 0, 1.0, &HashMap::new()).unwrap();
        publisher.publish("a", 1, 1.0, &HashMap::new()).unwrap();
        publisher.publish("b", 0, 1.0, &HashMap::new()).unwrap();
        let _ = publisher.publish("c", 0, f64::NAN, &HashMap::new());

        let stats = publisher.collect_stats();
        assert_eq!(stats.live_buckets, 2);
        assert_eq!(stats.samples_published, 3);
        assert_eq!(stats.samples_rejected, 1);
        assert_eq!(stats.buckets_created, 2);

        publisher.shutdown();
        assert_eq!(publisher.collect_stats().live_buckets, 0);
    }
}
