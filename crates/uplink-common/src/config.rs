//! Daemon configuration.
//!
//! Follows a two-stage shape: a raw [`ConfigInput`] of optional fields
//! deserialized from TOML, validated into a concrete [`Config`] whose fields
//! are all resolved. Validation failures are fatal at startup and are
//! surfaced (without applying the new config) on reload.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::MemberClass;

/// Interface-name prefixes that are never considered as members.
pub const DEFAULT_EXCLUDES: &[&str] = &["lo", "docker", "veth", "tun", "tap"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("scoring weights must sum to 1.0 (or 100 for legacy configs), got {0}")]
    InvalidWeights(f64),
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        reason: reason.into(),
    }
}

// ── Raw input ───────────────────────────────────────────────────────

/// Raw configuration as written in the TOML file. Every field is optional;
/// unknown keys are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigInput {
    pub enable: Option<bool>,
    pub use_policy_backend: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub decision_interval_ms: Option<u64>,
    pub discovery_interval_ms: Option<u64>,
    pub retention_hours: Option<u64>,
    pub max_ram_mb: Option<u64>,
    pub log_level: Option<LogLevel>,
    pub hysteresis_margin: Option<f64>,
    pub cooldown_seconds: Option<u64>,
    pub min_samples: Option<u32>,
    pub ewma_alpha: Option<f64>,
    pub starlink_api_host: Option<String>,
    pub starlink_api_port: Option<u16>,
    pub starlink_grpc_first: Option<bool>,
    pub starlink_http_first: Option<bool>,
    pub starlink_timeout_s: Option<u64>,
    pub ping_targets: Option<Vec<String>>,
    pub ping_count: Option<u32>,
    pub ping_timeout_s: Option<u64>,
    pub predictive: Option<bool>,
    pub listen_addr: Option<String>,
    pub class_overrides: Option<HashMap<String, MemberClass>>,
    pub exclude_interfaces: Option<Vec<String>>,
    pub member_grace_seconds: Option<u64>,
    pub cellular_adapter: Option<CellularAdapter>,
    pub weights: Option<WeightsInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeightsInput {
    pub latency: Option<f64>,
    pub loss: Option<f64>,
    pub jitter: Option<f64>,
    pub signal: Option<f64>,
    pub obstruction: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Which transport the cellular collector uses for modem status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellularAdapter {
    /// The platform RPC bus (`ubus`).
    RpcBus,
    /// The AT-command bridge (`gsmctl`).
    AtBridge,
}

// ── Validated config ────────────────────────────────────────────────

/// Scoring factor weights. Fractional, summing to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub latency: f64,
    pub loss: f64,
    pub jitter: f64,
    pub signal: f64,
    pub obstruction: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            latency: 0.40,
            loss: 0.30,
            jitter: 0.15,
            signal: 0.10,
            obstruction: 0.05,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.latency + self.loss + self.jitter + self.signal + self.obstruction
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub enable: bool,
    pub use_policy_backend: bool,
    pub poll_interval_ms: u64,
    pub decision_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub retention_hours: u64,
    pub max_ram_mb: u64,
    pub log_level: LogLevel,
    pub hysteresis_margin: f64,
    pub cooldown_seconds: u64,
    pub min_samples: u32,
    pub ewma_alpha: f64,
    pub starlink_api_host: String,
    pub starlink_api_port: u16,
    pub starlink_grpc_first: bool,
    pub starlink_timeout_s: u64,
    pub ping_targets: Vec<String>,
    pub ping_count: u32,
    pub ping_timeout_s: u64,
    pub predictive: bool,
    pub listen_addr: String,
    pub class_overrides: HashMap<String, MemberClass>,
    pub exclude_interfaces: Vec<String>,
    pub member_grace_seconds: u64,
    pub cellular_adapter: CellularAdapter,
    pub weights: ScoringWeights,
}

impl Default for Config {
    fn default() -> Self {
        // An empty input resolves to pure defaults and cannot fail.
        ConfigInput::default()
            .validate()
            .expect("default config is valid")
    }
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Config, ConfigError> {
        let input: ConfigInput = toml::from_str(s)?;
        input.validate()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn decision_interval(&self) -> Duration {
        Duration::from_millis(self.decision_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    /// Per-collector deadline: half the collection tick.
    pub fn collector_deadline(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms / 2)
    }

    /// Telemetry store byte cap.
    pub fn max_bytes(&self) -> usize {
        (self.max_ram_mb as usize) * 1024 * 1024
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}

impl ConfigInput {
    /// Resolve defaults and check invariants.
    pub fn validate(self) -> Result<Config, ConfigError> {
        let poll_interval_ms = self.poll_interval_ms.unwrap_or(2000);
        if poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be > 0"));
        }
        let decision_interval_ms = self.decision_interval_ms.unwrap_or(2000);
        if decision_interval_ms == 0 {
            return Err(invalid("decision_interval_ms", "must be > 0"));
        }
        let discovery_interval_ms = self.discovery_interval_ms.unwrap_or(30_000);
        if discovery_interval_ms == 0 {
            return Err(invalid("discovery_interval_ms", "must be > 0"));
        }
        let retention_hours = self.retention_hours.unwrap_or(24);
        if retention_hours == 0 {
            return Err(invalid("retention_hours", "must be > 0"));
        }
        let max_ram_mb = self.max_ram_mb.unwrap_or(64);
        if max_ram_mb == 0 {
            return Err(invalid("max_ram_mb", "must be > 0"));
        }
        let ewma_alpha = self.ewma_alpha.unwrap_or(0.3);
        if !(ewma_alpha > 0.0 && ewma_alpha <= 1.0) {
            return Err(invalid("ewma_alpha", "must be in (0, 1]"));
        }
        let hysteresis_margin = self.hysteresis_margin.unwrap_or(10.0);
        if hysteresis_margin < 0.0 {
            return Err(invalid("hysteresis_margin", "must be >= 0"));
        }

        // Setting either flag alone expresses a clean preference; gRPC
        // leads when neither is given.
        let http_first = self.starlink_http_first.unwrap_or(false);
        let grpc_first = self.starlink_grpc_first.unwrap_or(!http_first);
        if grpc_first && http_first {
            return Err(invalid(
                "starlink_http_first",
                "starlink_grpc_first and starlink_http_first are mutually exclusive",
            ));
        }

        let ping_count = self.ping_count.unwrap_or(3);
        if ping_count == 0 {
            return Err(invalid("ping_count", "must be > 0"));
        }

        let weights = resolve_weights(self.weights.unwrap_or_default())?;

        Ok(Config {
            enable: self.enable.unwrap_or(true),
            use_policy_backend: self.use_policy_backend.unwrap_or(true),
            poll_interval_ms,
            decision_interval_ms,
            discovery_interval_ms,
            retention_hours,
            max_ram_mb,
            log_level: self.log_level.unwrap_or(LogLevel::Info),
            hysteresis_margin,
            cooldown_seconds: self.cooldown_seconds.unwrap_or(30),
            min_samples: self.min_samples.unwrap_or(3),
            ewma_alpha,
            starlink_api_host: self
                .starlink_api_host
                .unwrap_or_else(|| "192.168.100.1".into()),
            starlink_api_port: self.starlink_api_port.unwrap_or(9200),
            starlink_grpc_first: grpc_first,
            starlink_timeout_s: self.starlink_timeout_s.unwrap_or(3),
            ping_targets: self
                .ping_targets
                .unwrap_or_else(|| vec!["1.1.1.1".into(), "8.8.8.8".into()]),
            ping_count,
            ping_timeout_s: self.ping_timeout_s.unwrap_or(2),
            predictive: self.predictive.unwrap_or(false),
            listen_addr: self.listen_addr.unwrap_or_else(|| "0.0.0.0:9321".into()),
            class_overrides: self.class_overrides.unwrap_or_default(),
            exclude_interfaces: self
                .exclude_interfaces
                .unwrap_or_else(|| DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()),
            member_grace_seconds: self.member_grace_seconds.unwrap_or(120),
            cellular_adapter: self.cellular_adapter.unwrap_or(CellularAdapter::RpcBus),
            weights,
        })
    }
}

/// Resolve the weight vector, accepting the legacy sum-to-100 convention by
/// normalizing it. Any other sum is an error.
fn resolve_weights(input: WeightsInput) -> Result<ScoringWeights, ConfigError> {
    let defaults = ScoringWeights::default();
    let mut w = ScoringWeights {
        latency: input.latency.unwrap_or(defaults.latency),
        loss: input.loss.unwrap_or(defaults.loss),
        jitter: input.jitter.unwrap_or(defaults.jitter),
        signal: input.signal.unwrap_or(defaults.signal),
        obstruction: input.obstruction.unwrap_or(defaults.obstruction),
    };

    for (key, v) in [
        ("weights.latency", w.latency),
        ("weights.loss", w.loss),
        ("weights.jitter", w.jitter),
        ("weights.signal", w.signal),
        ("weights.obstruction", w.obstruction),
    ] {
        if v < 0.0 {
            return Err(invalid("weights", format!("{key} must be >= 0, got {v}")));
        }
    }

    let sum = w.sum();
    if (sum - 1.0).abs() <= 0.01 {
        Ok(w)
    } else if (sum - 100.0).abs() <= 1.0 {
        tracing::warn!(sum, "scoring weights sum to 100; normalizing to fractions");
        w.latency /= 100.0;
        w.loss /= 100.0;
        w.jitter /= 100.0;
        w.signal /= 100.0;
        w.obstruction /= 100.0;
        Ok(w)
    } else {
        Err(ConfigError::InvalidWeights(sum))
    }
}
