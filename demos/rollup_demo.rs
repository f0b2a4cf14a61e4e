//! Roll up a few minutes of synthetic CPU samples and print the averages.
//!
//! Run with: cargo run --example rollup_demo

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tsdb_rollup::{ChannelSink, Config, RollupPublisher};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let (sink, receiver) = ChannelSink::bounded(1024);
    let config = Config {
        window_size_minutes: 1,
        flush_interval: Some(Duration::from_secs(3600)),
        ..Config::default()
    };
    let publisher = RollupPublisher::initialize(config, Arc::new(sink))?;

    // Three minutes of one-second samples from two hosts.
    let start = 1_700_000_040_000_i64;
    for second in 0..180 {
        let timestamp = start + second * 1_000;
        for (host, base) in [("web-1", 20.0), ("web-2", 60.0)] {
            let mut tags = HashMap::new();
            tags.insert("host".to_string(), host.to_string());
            let value = base + (second % 10) as f64;
            publisher.publish("cpu.load", timestamp, value, &tags)?;
        }
    }

    let stats = publisher.collect_stats();
    println!(
        "{} samples in {} live buckets",
        stats.samples_published, stats.live_buckets
    );

    // Everything before the last minute is closed.
    let report = publisher.flush_at(start + 120_000);
    println!("Regular flush emitted {} rollups", report.emitted);

    let report = publisher.shutdown();
    println!("Shutdown drained {} rollups", report.emitted);
    println!();

    for rollup in receiver.try_iter() {
        let window = rollup
            .window_start_utc()
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{} {} {:>6.2} (n={}) host={}",
            window,
            rollup.rollup_metric(),
            rollup.average,
            rollup.sample_count,
            rollup.tags.get("host").map(String::as_str).unwrap_or("-"),
        );
    }

    Ok(())
}
