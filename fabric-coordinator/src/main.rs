//! Storage fabric coordinator.
//!
//! Owns the device WebSocket channel, the replication control plane
//! (placement, distribution, retrieval), the background healer/reaper
//! worker pools, and the periodic health/trim/sweep scheduler. The HTTP
//! surface for uploads, downloads, and admin, and authentication, are
//! external collaborators layered on top of this process elsewhere.

use axum::routing::get;
use axum::Router;
use clap::Parser;
use fabric_connect::ws::{routes, DeviceChannelState, DeviceEventHandler};
use fabric_coordinator::{config, metrics, AppState, CoordinatorDeviceHandler, Scheduler};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fabric-coordinator")]
#[command(about = "Storage fabric coordinator: device channel and replication control plane")]
struct Cli {
    /// Path to a TOML config file. Equivalent to setting FABRIC_CONFIG_FILE.
    #[arg(long)]
    config_file: Option<String>,

    /// Run schema migrations and exit, without starting the server.
    #[arg(long, default_value = "false")]
    migrate_only: bool,
}

async fn health() -> &'static str {
    "OK"
}

async fn version() -> &'static str {
    concat!("fabric-coordinator/", env!("CARGO_PKG_VERSION"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(path) = &cli.config_file {
        std::env::set_var("FABRIC_CONFIG_FILE", path);
    }

    let config = config::CoordinatorConfig::load()?;
    init_tracing(&config.log_format);

    info!(
        listen_addr = %config.listen_addr,
        redundancy_factor = config.redundancy_factor,
        "starting fabric-coordinator"
    );

    let state = AppState::new(config.clone()).await?;
    if cli.migrate_only {
        info!("migrations applied, exiting (--migrate-only)");
        return Ok(());
    }

    if let Err(e) = metrics::install(config.metrics_port) {
        error!(error = %e, "failed to start metrics exporter, continuing without it");
    }

    let scheduler = Scheduler::new(
        state.health_scanner.clone(),
        state.staging.clone(),
        state.heal_queue.clone(),
        state.reap_queue.clone(),
        config.clone(),
    );
    let _scheduler_tasks = scheduler.spawn();

    let handler: Arc<dyn DeviceEventHandler> = Arc::new(CoordinatorDeviceHandler::new(
        state.device_registry.clone(),
        state.health_scanner.clone(),
    ));
    let channel_state = DeviceChannelState {
        registry: state.registry.clone(),
        handler,
        heartbeat_interval: config.heartbeat_interval,
    };

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/version", get(version))
        .merge(routes(channel_state))
        .layer(TraceLayer::new_for_http());

    let listen_addr: std::net::SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "device channel listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("coordinator shutdown complete");
    Ok(())
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_max_level(Level::INFO).with_env_filter(filter);
    if log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received terminate signal, shutting down");
        },
    }
}
