//! tsdb-rollup CLI
//!
//! Time-windowed averaging for OpenTSDB-style metric streams.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tsdb_rollup::{
    config::Config,
    core::{OverflowPolicy, Sample},
    sink::{LogSink, SharedSink},
    stats::{PersistedStats, RollupStats},
    RollupPublisher, VERSION,
};

#[derive(Parser)]
#[command(name = "tsdb-rollup")]
#[command(version = VERSION)]
#[command(about = "Time-windowed averaging for metric streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read JSON samples (one per line) from stdin and roll them up
    Run {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Accept samples over HTTP (POST /api/put)
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on (0 picks a free port)
        #[arg(long, default_value = "4243")]
        port: u16,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Show cumulative statistics from previous runs
    Status {
        /// Configuration file (.json or opentsdb.conf)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

#[derive(Args, Debug, Clone)]
struct ConfigOverrides {
    /// Configuration file (.json or opentsdb.conf)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Window size in minutes
    #[arg(long)]
    window: Option<u32>,

    /// Flush interval in seconds
    #[arg(long)]
    flush_interval: Option<u64>,

    /// Maximum number of live buckets
    #[arg(long)]
    max_buckets: Option<usize>,

    /// Overflow policy when the bucket table is full (reject_new or drop_oldest)
    #[arg(long)]
    overflow_policy: Option<OverflowPolicy>,

    /// Base URL of an OpenTSDB-compatible store to write rollups to
    #[arg(long)]
    tsdb_url: Option<String>,
}

impl ConfigOverrides {
    fn resolve(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("loading configuration from {path:?}"))?,
            None => Config::load().context("loading configuration")?,
        };

        if let Some(window) = self.window {
            config.window_size_minutes = window;
        }
        if let Some(secs) = self.flush_interval {
            config.flush_interval = Some(Duration::from_secs(secs));
        }
        if let Some(max) = self.max_buckets {
            config.max_buckets = max;
        }
        if let Some(policy) = self.overflow_policy {
            config.overflow_policy = policy;
        }
        if let Some(url) = &self.tsdb_url {
            config.tsdb_url = Some(url.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { overrides } => cmd_run(&overrides),
        #[cfg(feature = "server")]
        Commands::Serve { port, overrides } => cmd_serve(port, &overrides),
        Commands::Status { config } => cmd_status(config),
        Commands::Config { overrides } => cmd_config(&overrides),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_run(overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let config = overrides.resolve()?;
    print_banner(&config);

    let stats = Arc::new(RollupStats::with_persistence(config.stats_path()));
    let sink = build_sink(&config)?;
    let publisher = RollupPublisher::initialize_with_stats(config, sink, stats)?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(Arc::clone(&running))?;

    // Read stdin on its own thread so Ctrl+C is noticed between lines.
    let (line_tx, line_rx) = crossbeam_channel::bounded::<String>(10_000);
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
    });

    while running.load(Ordering::SeqCst) {
        match line_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Sample>(line) {
                    Ok(sample) => {
                        if let Err(e) = publisher.publish_sample(&sample) {
                            tracing::warn!("Dropping sample: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("Skipping malformed line: {e}"),
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    println!("Stopping...");
    let report = publisher.shutdown();
    println!(
        "Final flush: {} rollups emitted, {} dropped",
        report.emitted, report.failed
    );
    println!();
    println!("{}", publisher.collect_stats().summary());
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16, overrides: &ConfigOverrides) -> anyhow::Result<()> {
    use tsdb_rollup::server::{run, ServerConfig};

    let config = overrides.resolve()?;
    print_banner(&config);

    let stats = Arc::new(RollupStats::with_persistence(config.stats_path()));
    let sink = build_sink(&config)?;
    let publisher = Arc::new(RollupPublisher::initialize_with_stats(config, sink, stats)?);

    let runtime = tokio::runtime::Runtime::new().context("creating async runtime")?;
    runtime.block_on(async {
        let (addr, shutdown_tx) = run(ServerConfig::new(port), Arc::clone(&publisher)).await?;
        println!("Listening on http://{addr}");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl+C")?;
        let _ = shutdown_tx.send(());
        anyhow::Ok(())
    })?;
    drop(runtime);

    println!();
    println!("Stopping...");
    let report = publisher.shutdown();
    println!(
        "Final flush: {} rollups emitted, {} dropped",
        report.emitted, report.failed
    );
    println!();
    println!("{}", publisher.collect_stats().summary());
    Ok(())
}

fn cmd_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    println!("tsdb-rollup Status");
    println!("==================");
    println!();
    println!("Configuration:");
    println!("  Window: {} minutes", config.window_size_minutes);
    println!(
        "  Flush interval: {}s",
        config.effective_flush_interval().as_secs()
    );
    println!(
        "  Max buckets: {} ({:?} on overflow)",
        config.max_buckets, config.overflow_policy
    );
    println!(
        "  Sink: {}",
        config.tsdb_url.as_deref().unwrap_or("log only")
    );
    println!();

    match PersistedStats::read(&config.stats_path())? {
        Some(stats) => {
            println!("Cumulative Statistics (as of {}):", stats.last_updated);
            println!("  Samples published: {}", stats.samples_published);
            println!("  Samples rejected: {}", stats.samples_rejected);
            println!("  Buckets created: {}", stats.buckets_created);
            println!("  Rollups emitted: {}", stats.buckets_flushed);
            println!("  Emit failures: {}", stats.emit_failures);
            println!("  Buckets evicted: {}", stats.buckets_evicted);
        }
        None => println!("No previous session data found."),
    }
    Ok(())
}

fn cmd_config(overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let config = overrides.resolve()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn print_banner(config: &Config) {
    println!("tsdb-rollup v{VERSION}");
    println!();
    println!("  Window: {} minutes", config.window_size_minutes);
    println!(
        "  Flush interval: {}s",
        config.effective_flush_interval().as_secs()
    );
    println!(
        "  Max buckets: {} ({:?} on overflow)",
        config.max_buckets, config.overflow_policy
    );
    println!();
}

/// Pick the sink the configuration asks for.
fn build_sink(config: &Config) -> anyhow::Result<SharedSink> {
    #[cfg(feature = "http-sink")]
    if let Some(url) = &config.tsdb_url {
        use tsdb_rollup::sink::{HttpSink, HttpSinkConfig};

        let sink = HttpSink::new(HttpSinkConfig::new(url.clone()))?;
        match sink.test_connection() {
            Ok(true) => println!("  Sink: {} (connection OK)", sink.config().put_url()),
            Ok(false) => eprintln!("Warning: store at {url} failed its health check"),
            Err(e) => eprintln!("Warning: could not reach store at {url}: {e}"),
        }
        return Ok(Arc::new(sink));
    }

    #[cfg(not(feature = "http-sink"))]
    if config.tsdb_url.is_some() {
        eprintln!("Warning: tsdb_url ignored (http-sink feature not enabled at compile time)");
    }

    println!("  Sink: log only");
    Ok(Arc::new(LogSink))
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
