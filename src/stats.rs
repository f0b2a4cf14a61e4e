//! Runtime statistics for the rollup publisher.
//!
//! Counters are lock-free so the publish path never waits on a reader.
//! Cumulative totals can be persisted across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters updated by the publish and flush paths.
#[derive(Debug)]
pub struct RollupStats {
    samples_published: AtomicU64,
    samples_rejected: AtomicU64,
    buckets_created: AtomicU64,
    buckets_flushed: AtomicU64,
    emit_failures: AtomicU64,
    buckets_evicted: AtomicU64,
    flush_passes: AtomicU64,
    instance_id: Uuid,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl RollupStats {
    pub fn new() -> Self {
        Self {
            samples_published: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            buckets_created: AtomicU64::new(0),
            buckets_flushed: AtomicU64::new(0),
            emit_failures: AtomicU64::new(0),
            buckets_evicted: AtomicU64::new(0),
            flush_passes: AtomicU64::new(0),
            instance_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that resume from, and save back to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous rollup stats: {e}");
        }

        stats
    }

    pub fn record_published(&self) {
        self.samples_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bucket_created(&self) {
        self.buckets_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, count: u64) {
        self.buckets_flushed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emit_failures(&self, count: u64) {
        self.emit_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.buckets_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_flush_pass(&self) {
        self.flush_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Take a snapshot; `live_buckets` comes from the table at call time.
    pub fn snapshot(&self, live_buckets: usize) -> StatsSnapshot {
        StatsSnapshot {
            instance_id: self.instance_id,
            live_buckets,
            samples_published: self.samples_published.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            buckets_created: self.buckets_created.load(Ordering::Relaxed),
            buckets_flushed: self.buckets_flushed.load(Ordering::Relaxed),
            emit_failures: self.emit_failures.load(Ordering::Relaxed),
            buckets_evicted: self.buckets_evicted.load(Ordering::Relaxed),
            flush_passes: self.flush_passes.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Save cumulative counters to disk, if persistence is configured.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                samples_published: self.samples_published.load(Ordering::Relaxed),
                samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
                buckets_created: self.buckets_created.load(Ordering::Relaxed),
                buckets_flushed: self.buckets_flushed.load(Ordering::Relaxed),
                emit_failures: self.emit_failures.load(Ordering::Relaxed),
                buckets_evicted: self.buckets_evicted.load(Ordering::Relaxed),
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(persisted) = PersistedStats::read(path)? {
                self.samples_published
                    .store(persisted.samples_published, Ordering::Relaxed);
                self.samples_rejected
                    .store(persisted.samples_rejected, Ordering::Relaxed);
                self.buckets_created
                    .store(persisted.buckets_created, Ordering::Relaxed);
                self.buckets_flushed
                    .store(persisted.buckets_flushed, Ordering::Relaxed);
                self.emit_failures
                    .store(persisted.emit_failures, Ordering::Relaxed);
                self.buckets_evicted
                    .store(persisted.buckets_evicted, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for RollupStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the publisher's statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub instance_id: Uuid,
    pub live_buckets: usize,
    pub samples_published: u64,
    pub samples_rejected: u64,
    pub buckets_created: u64,
    pub buckets_flushed: u64,
    pub emit_failures: u64,
    pub buckets_evicted: u64,
    pub flush_passes: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl StatsSnapshot {
    /// Human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "Rollup Statistics:\n\
             - Live buckets: {}\n\
             - Samples published: {}\n\
             - Samples rejected: {}\n\
             - Buckets created: {}\n\
             - Rollups emitted: {}\n\
             - Emit failures: {}\n\
             - Buckets evicted: {}\n\
             - Flush passes: {}\n\
             - Session duration: {} seconds",
            self.live_buckets,
            self.samples_published,
            self.samples_rejected,
            self.buckets_created,
            self.buckets_flushed,
            self.emit_failures,
            self.buckets_evicted,
            self.flush_passes,
            self.session_duration_secs
        )
    }
}

/// Cumulative counters as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStats {
    pub samples_published: u64,
    pub samples_rejected: u64,
    pub buckets_created: u64,
    pub buckets_flushed: u64,
    pub emit_failures: u64,
    pub buckets_evicted: u64,
    pub last_updated: DateTime<Utc>,
}

impl PersistedStats {
    /// Read persisted counters; `Ok(None)` when nothing was saved yet.
    pub fn read(path: &Path) -> Result<Option<Self>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let persisted = serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Some(persisted))
    }
}

/// Thread-safe shared statistics.
pub type SharedStats = Arc<RollupStats>;
