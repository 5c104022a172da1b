//! Ping Monitor Service
//!
//! Keeps live latency probes running against a set of hosting locations and
//! serves the current readings over HTTP.
//!
//! Usage:
//!   ping_monitor 198.51.100.7 203.0.113.9 --port 9090
//!   ping_monitor 198.51.100.7 --once
//!
//! Environment Variables:
//!   PING_MONITOR_ADDRESSES - Comma-separated addresses to probe
//!   PING_MONITOR_CONFIG - Path to TOML config file
//!   PING_MONITOR_PORT - HTTP port (default: 9090)
//!   PING_MONITOR_LOG_LEVEL - Log level (default: info)

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ping_probe::probe::{
    CancelHandle, LatencyBoard, LocationLatency, ProbeConfig, ProbeDriver, ProbeMetrics,
    ProbeRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "ping_monitor")]
#[command(about = "Live latency probing for hosting locations")]
struct Args {
    /// Addresses (host or IP) to probe
    #[arg(env = "PING_MONITOR_ADDRESSES", value_delimiter = ',')]
    addresses: Vec<String>,

    /// Path to TOML configuration file
    #[arg(short, long, env = "PING_MONITOR_CONFIG")]
    config: Option<String>,

    /// HTTP port for /latency, /metrics and /health
    #[arg(short, long, env = "PING_MONITOR_PORT", default_value = "9090")]
    port: u16,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(short, long, env = "PING_MONITOR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Measure each address once, print JSON and exit
    #[arg(long)]
    once: bool,
}

#[derive(Clone)]
struct AppState {
    board: Arc<LatencyBoard>,
    metrics: Arc<ProbeMetrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path);
            ProbeConfig::load(path)?
        }
        None => {
            info!("Using default configuration");
            ProbeConfig::default()
        }
    };

    let addresses: Vec<String> = args
        .addresses
        .iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if addresses.is_empty() {
        bail!("no addresses to probe (pass them as arguments or PING_MONITOR_ADDRESSES)");
    }

    let registry = ProbeRegistry::new(config.clone());

    if args.once {
        return measure_once(&registry, &addresses).await;
    }

    let board = Arc::new(LatencyBoard::new(config.display.clone()));
    let mut handles: Vec<CancelHandle> = Vec::with_capacity(addresses.len());

    info!("Probing {} addresses", addresses.len());
    for address in &addresses {
        info!("  - {}", config.url_for(address));
        board.track(address);

        let board = board.clone();
        let key = address.clone();
        handles.push(registry.subscribe(Some(address.as_str()), move |latency| {
            board.record(&key, latency);
        }));
    }

    let driver = ProbeDriver::with_config_interval(registry.clone(), addresses.clone()).spawn();

    let state = AppState {
        board: board.clone(),
        metrics: registry.metrics(),
    };
    let app = Router::new()
        .route("/latency", get(latency_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Latency readings available at http://{}/latency", addr);

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            if let Err(e) = result {
                warn!("HTTP server exited: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    driver.abort();
    for handle in handles {
        handle.cancel();
    }
    registry.shutdown();

    Ok(())
}

/// Legacy single-shot mode: one reading per address, printed as JSON
async fn measure_once(registry: &ProbeRegistry, addresses: &[String]) -> Result<()> {
    let driver = ProbeDriver::with_config_interval(registry.clone(), addresses.to_vec()).spawn();
    let board = LatencyBoard::new(registry.config().display.clone());

    let readings = futures_util::future::join_all(
        addresses
            .iter()
            .map(|address| async move { (address, registry.measure_once(Some(address.as_str())).await) }),
    )
    .await;

    driver.abort();
    for (address, latency) in readings {
        board.record(address, latency);
    }
    registry.shutdown();

    println!("{}", serde_json::to_string_pretty(&board.snapshot())?);
    Ok(())
}

async fn latency_handler(State(state): State<AppState>) -> Json<Vec<LocationLatency>> {
    Json(state.board.snapshot())
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.to_prometheus()
}
