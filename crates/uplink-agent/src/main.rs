//! Uplink failover daemon.
//!
//! Multi-WAN failover for cellular routers carrying a Starlink uplink:
//!
//! - Discovers candidate uplink interfaces and classifies them
//! - Probes each one per cycle (dish API, modem query, ping fallbacks)
//! - Scores members and switches the default egress under hysteresis
//! - Serves status, events, and a Prometheus scrape over HTTP
//! - In `--simulate` mode, runs against synthetic members for local dev

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{watch, Mutex};
use tracing_subscriber::EnvFilter;

use uplink_agent::{api, runtime, state::AppState};
use uplink_common::config::Config;
use uplink_engine::controller::Controller;
use uplink_engine::decision::DecisionEngine;
use uplink_engine::discovery::{Discovery, LinkSource, SimulatedSource, SysfsSource};
use uplink_engine::route::{NetifdBackend, NoopRoutePolicy, PolicyManagerBackend, RoutePolicy};
use uplink_engine::sink::{EventSink, LogSink};
use uplink_engine::stats::RuntimeStats;
use uplink_engine::store::{StoreLimits, TelemetryStore};

/// How long workers get to wind down after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Route-backend calls are bounded so a wedged RPC bus cannot hang a
/// decision cycle forever.
const ROUTE_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Uplink failover daemon.
#[derive(Parser, Debug)]
#[command(name = "uplink-agent", about = "Multi-WAN failover daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/uplink/uplink.toml")]
    config: PathBuf,

    /// Control API listen address override.
    #[arg(long)]
    listen: Option<String>,

    /// Run against synthetic members and a no-op route backend.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Log level override (debug|info|warn|error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Configuration ───────────────────────────────────────────
    let (mut config, config_path) = if cli.config.exists() {
        let text = std::fs::read_to_string(&cli.config)?;
        (Config::from_toml_str(&text)?, Some(cli.config.clone()))
    } else {
        (Config::default(), None)
    };
    if let Some(listen) = &cli.listen {
        config.listen_addr = listen.clone();
    }

    // ── Logging ─────────────────────────────────────────────────
    let default_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.as_str().to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if config_path.is_none() {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
    }
    if !config.enable {
        tracing::info!("disabled by config (enable = false), exiting");
        return Ok(());
    }

    tracing::info!(
        simulate = cli.simulate,
        listen = %config.listen_addr,
        policy_backend = config.use_policy_backend,
        "uplink-agent starting"
    );

    // ── Engine assembly ─────────────────────────────────────────
    let store = Arc::new(TelemetryStore::new(StoreLimits {
        retention: config.retention(),
        max_bytes: config.max_bytes(),
    }));
    let sink: Arc<dyn EventSink> = Arc::new(LogSink);
    let stats = Arc::new(RuntimeStats::new());

    let policy: Box<dyn RoutePolicy> = if cli.simulate {
        Box::new(NoopRoutePolicy)
    } else if config.use_policy_backend {
        Box::new(PolicyManagerBackend::new(ROUTE_BACKEND_TIMEOUT))
    } else {
        Box::new(NetifdBackend::new(ROUTE_BACKEND_TIMEOUT))
    };
    let controller = Arc::new(Controller::new(
        policy,
        store.clone(),
        sink.clone(),
        stats.clone(),
    ));

    let engine = Arc::new(Mutex::new(DecisionEngine::new(
        (&config).into(),
        store.clone(),
        sink.clone(),
        stats.clone(),
    )));

    let source: Box<dyn LinkSource> = if cli.simulate {
        Box::new(SimulatedSource)
    } else {
        Box::new(SysfsSource::new())
    };
    let discovery = Arc::new(Mutex::new(Discovery::new(
        source,
        &config,
        store.clone(),
        sink.clone(),
    )));

    let listen_addr: SocketAddr = config.listen_addr.parse()?;
    let state = AppState::new(
        config,
        config_path,
        cli.simulate,
        store.clone(),
        controller,
        engine,
        discovery,
        stats,
    );

    // ── Tasks ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let discovery_handle = tokio::spawn(runtime::discovery_loop(
        state.clone(),
        shutdown_rx.clone(),
    ));
    let collection_handle = tokio::spawn(runtime::collection_loop(
        state.clone(),
        sink.clone(),
        shutdown_rx.clone(),
    ));
    let decision_handle = tokio::spawn(runtime::decision_loop(
        state.clone(),
        sink.clone(),
        shutdown_rx.clone(),
    ));

    let app = api::router()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state);

    tracing::info!("control api listening on {listen_addr}");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    let mut api_shutdown = shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });

    // ── Shutdown ────────────────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = api_handle => {
            if let Err(e) = result {
                tracing::error!("api task failed: {e}");
            }
        }
    }
    let _ = shutdown_tx.send(true);

    // Cancellation propagates top-down; workers get a bounded grace
    // period, then the process exits regardless.
    let drain = async {
        let _ = decision_handle.await;
        let _ = collection_handle.await;
        let _ = discovery_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("workers did not stop within the grace period");
    }

    store.close();
    tracing::info!("uplink-agent stopped");
    Ok(())
}
