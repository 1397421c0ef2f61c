//! Shared application state.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use uplink_common::config::{Config, ConfigError};
use uplink_common::models::{MemberStatus, StatusSnapshot};
use uplink_engine::controller::Controller;
use uplink_engine::decision::DecisionEngine;
use uplink_engine::discovery::Discovery;
use uplink_engine::stats::RuntimeStats;
use uplink_engine::store::TelemetryStore;

/// State shared across the runtime tickers and all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    config: ArcSwap<Config>,
    config_path: Option<PathBuf>,
    simulate: bool,
    store: Arc<TelemetryStore>,
    controller: Arc<Controller>,
    engine: Arc<Mutex<DecisionEngine>>,
    discovery: Arc<Mutex<Discovery>>,
    stats: Arc<RuntimeStats>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        simulate: bool,
        store: Arc<TelemetryStore>,
        controller: Arc<Controller>,
        engine: Arc<Mutex<DecisionEngine>>,
        discovery: Arc<Mutex<Discovery>>,
        stats: Arc<RuntimeStats>,
    ) -> Self {
        AppState {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(config),
                config_path,
                simulate,
                store,
                controller,
                engine,
                discovery,
                stats,
            }),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.inner.config.load_full()
    }

    pub fn simulate(&self) -> bool {
        self.inner.simulate
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.inner.store
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.inner.controller
    }

    pub fn engine(&self) -> &Arc<Mutex<DecisionEngine>> {
        &self.inner.engine
    }

    pub fn discovery(&self) -> &Arc<Mutex<Discovery>> {
        &self.inner.discovery
    }

    pub fn stats(&self) -> &Arc<RuntimeStats> {
        &self.inner.stats
    }

    /// Re-read and validate the config file, swap it in atomically, and
    /// propagate the pieces that take effect without a restart (decision
    /// tuning, discovery tables, collector settings). Store limits stay
    /// until restart. A validation failure leaves the running config
    /// untouched.
    pub async fn reload_config(&self) -> Result<Arc<Config>, ConfigError> {
        let path = match &self.inner.config_path {
            Some(p) => p.clone(),
            None => return Ok(self.config()),
        };
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::InvalidValue {
            key: "config",
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let cfg = Arc::new(Config::from_toml_str(&text)?);

        self.inner.config.store(cfg.clone());
        self.inner.engine.lock().await.set_tuning((&*cfg).into());
        self.inner.discovery.lock().await.apply_config(&cfg);
        tracing::info!(path = %path.display(), "configuration reloaded");
        Ok(cfg)
    }

    /// Ready once discovery has produced at least one member and the
    /// decision engine has completed a clean cycle.
    pub async fn ready(&self) -> bool {
        !self.inner.controller.members().is_empty() && self.inner.engine.lock().await.ready()
    }

    /// Assemble the read-only view served by `/api/status` and `/metrics`.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let engine = self.inner.engine.lock().await;
        let members = self
            .inner
            .controller
            .members()
            .into_iter()
            .map(|member| {
                let (state, score) = engine.track_view(&member.name);
                let latest = self
                    .inner
                    .store
                    .latest_sample(&member.name)
                    .map(|s| s.metrics);
                MemberStatus {
                    member,
                    state,
                    score,
                    latest,
                }
            })
            .collect();
        drop(engine);

        StatusSnapshot {
            active_member: self.inner.controller.active_name(),
            members,
            counters: self.inner.stats.counters(),
            last_error: self.inner.stats.last_error(),
            uptime_s: self.inner.stats.uptime_s(),
        }
    }
}
