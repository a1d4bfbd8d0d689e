//! hearthd - smart-home telemetry and control server
//!
//! # Usage
//!
//! ```bash
//! # Run with hearthd.toml from the working directory (or defaults)
//! cargo run --release
//!
//! # Point at a broker explicitly
//! MQTT_HOST=broker.lan MQTT_PORT=1883 cargo run --release
//! ```
//!
//! # Environment Variables
//!
//! - `HEARTHD_CONFIG`: path to the TOML config file
//! - `MQTT_HOST` / `MQTT_PORT` / `MQTT_USERNAME` / `MQTT_PASSWORD` /
//!   `MQTT_TOPIC_PREFIX`: broker overrides
//! - `ENERGY_PRICE_PER_KWH`: tariff override
//! - `RUST_LOG`: logging level (default: info)
//! - `RESET_DB`: set to "true" to wipe all persistent data on startup

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hearthd::alerts::{MailTransport, SmtpMailer};
use hearthd::api::{create_app, AppContext};
use hearthd::bus::{self, CommandPublisher, MqttBus};
use hearthd::config::{self, HomeConfig};
use hearthd::gateway::{ingress_patterns, Gateway};
use hearthd::realtime::TicketIssuer;
use hearthd::store::Store;
use hearthd::types::{LogLevel, LogSource};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "hearthd")]
#[command(about = "Smart-home telemetry and control server")]
#[command(version)]
struct CliArgs {
    /// Override the HTTP server address (default from config: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to the TOML config file (overrides HEARTHD_CONFIG)
    #[arg(long)]
    config: Option<String>,

    /// Reset all persistent data (devices, history, logs, rules) on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

/// Remove the data directory before any storage initialization.
fn reset_data_directory(data_dir: &str) -> Result<()> {
    let path = std::path::Path::new(data_dir);
    if !path.exists() {
        info!("data directory does not exist, nothing to reset");
        return Ok(());
    }

    warn!("RESET_DB requested — wiping {}", path.display());
    std::fs::remove_dir_all(path).context("failed to remove data directory")?;
    warn!("data directory removed; a fresh database will be created");
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("hearthd starting");

    // Configuration: explicit --config > HEARTHD_CONFIG > ./hearthd.toml > defaults.
    let home_config = match &args.config {
        Some(path) => HomeConfig::from_file(path)
            .with_context(|| format!("cannot load config file {path}"))
            .map(|mut cfg| {
                cfg.realtime.stream_token_ttl_seconds =
                    cfg.realtime.stream_token_ttl_seconds.max(5);
                cfg
            })?,
        None => HomeConfig::load(),
    };
    config::init(home_config);
    let cfg = config::get();

    if should_reset_db(args.reset_db) {
        reset_data_directory(&cfg.server.data_dir)?;
    }

    // Storage.
    let db_path = std::path::Path::new(&cfg.server.data_dir).join("hearthd-db");
    let store = Store::open(&db_path)
        .with_context(|| format!("cannot open store at {}", db_path.display()))?;
    store.append_log(
        LogLevel::Info,
        LogSource::System,
        "hearthd starting",
        None,
        None,
    )?;

    // Mail transport for the alert engine.
    let mailer: Arc<dyn MailTransport> = Arc::new(
        SmtpMailer::new(&cfg.smtp).map_err(|e| anyhow::anyhow!("smtp setup failed: {e}"))?,
    );

    // Bus: one subscriber session for the gateway, plus the shared publisher
    // used by the API path and scene engine.
    let patterns = ingress_patterns(&cfg.mqtt);
    let (_gateway_bus, ingress) = MqttBus::connect(&cfg.mqtt, "gateway", &patterns)
        .map_err(|e| anyhow::anyhow!("gateway bus setup failed: {e}"))?;
    let publisher: Arc<dyn CommandPublisher> = Arc::new(
        bus::publisher()
            .await
            .map_err(|e| anyhow::anyhow!("publisher bus setup failed: {e}"))?
            .clone(),
    );

    // Telemetry gateway task.
    let cancel_token = CancellationToken::new();
    let gateway = Gateway::new(store.clone(), publisher.clone(), mailer);
    let gateway_cancel = cancel_token.clone();
    let gateway_task = tokio::spawn(async move {
        gateway.run(ingress, gateway_cancel).await;
    });

    // HTTP server.
    let ctx = AppContext {
        store: store.clone(),
        publisher,
        tickets: Arc::new(TicketIssuer::new(
            cfg.realtime.secret.as_bytes().to_vec(),
            cfg.realtime.stream_token_ttl_seconds,
        )),
    };
    let app = create_app(ctx);

    let addr = args.addr.clone().unwrap_or_else(|| cfg.server.addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(addr = %addr, "http server listening");

    let shutdown_token = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_token.cancel();
        })
        .await
        .context("http server error")?;

    // Let the gateway drain before flushing.
    cancel_token.cancel();
    let _ = gateway_task.await;
    store.flush()?;
    info!("hearthd stopped");

    Ok(())
}
