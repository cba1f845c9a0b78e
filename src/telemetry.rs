// src/telemetry.rs
//! Tracing subscriber setup and Prometheus metric registration.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "infopulse=info,warn";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Also append every line to this file (no ANSI colors).
    pub file: Option<PathBuf>,
    /// JSON lines on stdout instead of the compact format.
    pub json: bool,
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(opts: &LogOptions) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let file_layer = match &opts.file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating log directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let compact = (!opts.json).then(|| fmt::layer().compact());
    let json = opts.json.then(|| fmt::layer().json());

    tracing_subscriber::registry()
        .with(filter)
        .with(compact)
        .with(json)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_cycles_total", "Ingestion cycles started.");
        describe_counter!(
            "ingest_source_errors_total",
            "Sources that failed to fetch or parse within a cycle."
        );
        describe_counter!(
            "ingest_items_fetched_total",
            "Records normalized from successful sources."
        );
        describe_counter!(
            "ingest_items_inserted_total",
            "Records newly written to the store (after dedup)."
        );
        describe_counter!(
            "ingest_items_evicted_total",
            "Records removed by the retention policy."
        );
        describe_histogram!("ingest_fetch_ms", "Per-source fetch+parse time in milliseconds.");
        describe_gauge!("ingest_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

/// Install the global Prometheus recorder. Call once per process.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;
    describe_metrics();
    Ok(handle)
}
