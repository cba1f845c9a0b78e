//! Infopulse ingestion node: binary entrypoint.
//! Loads configuration, opens the store, starts the periodic engine and
//! serves the HTTP query API until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use infopulse::api::{self, AppState};
use infopulse::config::AppConfig;
use infopulse::engine::IngestEngine;
use infopulse::telemetry::{self, LogOptions};

#[derive(Parser, Debug)]
#[command(name = "infopulse", about = "Feed ingestion engine with an HTTP query API")]
struct Args {
    /// Config file (TOML or JSON). Falls back to $INFOPULSE_CONFIG, then config/infopulse.{toml,json}
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append logs to this file as well as stdout
    #[arg(long, env = "INFOPULSE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,

    /// HTTP listen address (overrides config)
    #[arg(long, env = "INFOPULSE_BIND")]
    bind: Option<String>,

    /// Run a single cycle, print its report and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(p) => AppConfig::load_from(p),
        None => AppConfig::load_default(),
    }
    .context("loading configuration")?;

    telemetry::init_tracing(&LogOptions {
        file: args.log_file.clone().or_else(|| cfg.log_file.clone()),
        json: args.log_json || cfg.log_json,
    })?;
    let metrics = telemetry::install_prometheus()?;

    let engine = Arc::new(IngestEngine::from_app_config(&cfg).context("opening record store")?);

    if args.once {
        let outcome = engine.refresh_now().await;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    engine.start().await?;

    let bind = args.bind.unwrap_or_else(|| cfg.bind_addr.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(addr = %bind, "http api listening");

    let app = api::router(AppState::new(Arc::clone(&engine)).with_metrics(metrics));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("http server")?;

    engine.stop().await;
    Ok(())
}
