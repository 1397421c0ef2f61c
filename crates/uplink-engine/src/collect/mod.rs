//! # Collectors
//!
//! One probe implementation per member class, dispatched by a factory
//! keyed on the class tag. Every collector honors its deadline, prefers a
//! native status API where the class has one, and degrades to partial
//! metrics (tagged with the method that produced them) rather than failing
//! whenever any fallback path yields at least one field.

pub mod cellular;
pub mod ifinfo;
pub mod ping;
pub mod starlink;
pub mod wifi;

use std::time::Duration;

use rand::Rng;

use uplink_common::config::Config;
use uplink_common::models::{CollectionMethod, Member, MemberClass, Metrics};

use cellular::{CellularCollector, ModemProbe};
use ping::PingProbe;
use starlink::StarlinkCollector;
use wifi::WifiCollector;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("collection deadline exceeded")]
    DeadlineExceeded,
    #[error("no collection path yielded data for {member}: {detail}")]
    NoData { member: String, detail: String },
}

/// Probe configuration shared by all collectors, derived from the daemon
/// config.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub ping: PingProbe,
    pub starlink_host: String,
    pub starlink_port: u16,
    pub starlink_grpc_first: bool,
    pub starlink_timeout: Duration,
    pub cellular_adapter: uplink_common::config::CellularAdapter,
}

impl CollectorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        CollectorSettings {
            ping: PingProbe {
                targets: cfg.ping_targets.clone(),
                count: cfg.ping_count,
                timeout_s: cfg.ping_timeout_s,
            },
            starlink_host: cfg.starlink_api_host.clone(),
            starlink_port: cfg.starlink_api_port,
            starlink_grpc_first: cfg.starlink_grpc_first,
            starlink_timeout: Duration::from_secs(cfg.starlink_timeout_s),
            cellular_adapter: cfg.cellular_adapter,
        }
    }
}

/// Collector variants, one per class.
pub enum MemberCollector {
    Starlink(StarlinkCollector),
    Cellular(CellularCollector),
    Wifi(WifiCollector),
    Ping(PingOnlyCollector),
    Simulated(SimulatedCollector),
}

/// Factory: pick the collector for a member's class.
pub fn collector_for(class: MemberClass, settings: &CollectorSettings) -> MemberCollector {
    match class {
        MemberClass::Starlink => MemberCollector::Starlink(StarlinkCollector::new(
            settings.starlink_host.clone(),
            settings.starlink_port,
            settings.starlink_grpc_first,
            settings.starlink_timeout,
            settings.ping.clone(),
        )),
        MemberClass::Cellular => MemberCollector::Cellular(CellularCollector::new(
            ModemProbe {
                adapter: settings.cellular_adapter,
                timeout: cellular::MODEM_QUERY_TIMEOUT,
            },
            settings.ping.clone(),
        )),
        MemberClass::Wifi => MemberCollector::Wifi(WifiCollector::new(settings.ping.clone())),
        MemberClass::Lan | MemberClass::Other => {
            MemberCollector::Ping(PingOnlyCollector::new(settings.ping.clone()))
        }
    }
}

/// Factory for `--simulate` runs: synthetic metrics per class.
pub fn simulated_collector(class: MemberClass) -> MemberCollector {
    MemberCollector::Simulated(SimulatedCollector { class })
}

impl MemberCollector {
    /// Collect one metrics record for `member`, bounded by `deadline`.
    pub async fn collect(
        &self,
        member: &Member,
        deadline: Duration,
    ) -> Result<Metrics, CollectError> {
        match tokio::time::timeout(deadline, self.collect_inner(member)).await {
            Ok(result) => result,
            Err(_) => Err(CollectError::DeadlineExceeded),
        }
    }

    async fn collect_inner(&self, member: &Member) -> Result<Metrics, CollectError> {
        match self {
            MemberCollector::Starlink(c) => c.collect(member).await,
            MemberCollector::Cellular(c) => c.collect(member).await,
            MemberCollector::Wifi(c) => c.collect(member).await,
            MemberCollector::Ping(c) => c.collect(member).await,
            MemberCollector::Simulated(c) => Ok(c.collect(member)),
        }
    }
}

/// Ping-only collector for `lan` and `other` members.
pub struct PingOnlyCollector {
    ping: PingProbe,
}

impl PingOnlyCollector {
    pub fn new(ping: PingProbe) -> Self {
        PingOnlyCollector { ping }
    }

    pub async fn collect(&self, member: &Member) -> Result<Metrics, CollectError> {
        let outcome = self.ping.probe(member).await?;
        Ok(ping::metrics_from_ping(
            &outcome,
            CollectionMethod::FallbackPing,
        ))
    }
}

/// Synthetic metrics for development machines without router hardware.
pub struct SimulatedCollector {
    class: MemberClass,
}

impl SimulatedCollector {
    pub fn collect(&self, _member: &Member) -> Metrics {
        let mut rng = rand::rng();
        let mut m = Metrics::empty(CollectionMethod::NativeApi);
        match self.class {
            MemberClass::Starlink => {
                m.latency_ms = Some(35.0 + rng.random_range(0.0..20.0));
                m.loss_pct = Some(rng.random_range(0.0..0.5));
                m.jitter_ms = Some(rng.random_range(2.0..8.0));
                m.signal_dbm = Some(-65.0 - rng.random_range(0.0..10.0));
                m.obstruction_pct = Some(rng.random_range(0.0..3.0));
            }
            MemberClass::Cellular => {
                m.latency_ms = Some(60.0 + rng.random_range(0.0..60.0));
                m.loss_pct = Some(rng.random_range(0.0..2.0));
                m.jitter_ms = Some(rng.random_range(5.0..25.0));
                m.signal_dbm = Some(-75.0 - rng.random_range(0.0..20.0));
                m.operator = Some("SimCell".into());
            }
            MemberClass::Wifi => {
                m.latency_ms = Some(10.0 + rng.random_range(0.0..30.0));
                m.loss_pct = Some(rng.random_range(0.0..1.0));
                m.jitter_ms = Some(rng.random_range(1.0..15.0));
                m.signal_dbm = Some(-55.0 - rng.random_range(0.0..25.0));
            }
            MemberClass::Lan | MemberClass::Other => {
                m.latency_ms = Some(2.0 + rng.random_range(0.0..10.0));
                m.loss_pct = Some(0.0);
                m.jitter_ms = Some(rng.random_range(0.5..3.0));
            }
        }
        m
    }
}
