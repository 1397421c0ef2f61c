//! Cellular collector.
//!
//! Primary path: the modem's status query, reaching the modem either over
//! the platform RPC bus (`ubus`) or the AT-command bridge (`gsmctl`),
//! selected by deployment config. The query yields signal strength,
//! operator, and network type; latency, loss, and jitter ride along from a
//! concurrent ping.
//!
//! Fallback path: ping plus an interface byte-counter delta as a
//! throughput sanity check, tagged `interface_estimate`.

use std::time::Duration;

use tokio::process::Command;

use uplink_common::config::CellularAdapter;
use uplink_common::models::{CollectionMethod, Member, Metrics};

use super::ifinfo::read_iface_counters;
use super::ping::{metrics_from_ping, PingProbe};
use super::CollectError;

/// Consumed fields from a modem status query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModemStatus {
    pub signal_dbm: f64,
    pub operator: Option<String>,
    pub network: Option<String>,
}

/// Modem queries answer from local daemons; they get a short fixed budget.
pub const MODEM_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Adapter over the two modem-query transports.
#[derive(Debug, Clone)]
pub struct ModemProbe {
    pub adapter: CellularAdapter,
    pub timeout: Duration,
}

impl ModemProbe {
    pub async fn query(&self, member: &Member) -> Result<ModemStatus, CollectError> {
        match self.adapter {
            CellularAdapter::RpcBus => self.query_rpc_bus(member).await,
            CellularAdapter::AtBridge => self.query_at_bridge(member).await,
        }
    }

    /// `ubus -S call <modem-object> info` — JSON out.
    async fn query_rpc_bus(&self, member: &Member) -> Result<ModemStatus, CollectError> {
        let object = member
            .config
            .get("modem_object")
            .map(String::as_str)
            .unwrap_or("gsm.modem0");

        let stdout = self
            .run(member, Command::new("ubus").args(["-S", "call", object, "info"]))
            .await?;
        let value: serde_json::Value =
            serde_json::from_str(&stdout).map_err(|e| CollectError::NoData {
                member: member.name.clone(),
                detail: format!("modem rpc payload: {e}"),
            })?;
        parse_rpc_status(&value).ok_or_else(|| CollectError::NoData {
            member: member.name.clone(),
            detail: "modem rpc payload carried no signal".into(),
        })
    }

    /// `gsmctl -q` for signal, `gsmctl -o` for operator.
    async fn query_at_bridge(&self, member: &Member) -> Result<ModemStatus, CollectError> {
        let signal_out = self.run(member, Command::new("gsmctl").arg("-q")).await?;
        let signal_dbm = parse_at_signal(&signal_out).ok_or_else(|| CollectError::NoData {
            member: member.name.clone(),
            detail: format!("unparseable gsmctl signal output: {}", signal_out.trim()),
        })?;

        // Operator is best-effort; a modem mid-registration reports none.
        let operator = self
            .run(member, Command::new("gsmctl").arg("-o"))
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s != "N/A");

        Ok(ModemStatus {
            signal_dbm,
            operator,
            network: None,
        })
    }

    async fn run(&self, member: &Member, cmd: &mut Command) -> Result<String, CollectError> {
        cmd.kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CollectError::DeadlineExceeded)?
            .map_err(|e| CollectError::NoData {
                member: member.name.clone(),
                detail: format!("failed to spawn modem query: {e}"),
            })?;
        if !output.status.success() {
            return Err(CollectError::NoData {
                member: member.name.clone(),
                detail: format!(
                    "modem query exited {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

pub struct CellularCollector {
    modem: ModemProbe,
    ping: PingProbe,
}

impl CellularCollector {
    pub fn new(modem: ModemProbe, ping: PingProbe) -> Self {
        CellularCollector { modem, ping }
    }

    pub async fn collect(&self, member: &Member) -> Result<Metrics, CollectError> {
        let counters_before = read_iface_counters(&member.iface);
        let (modem_result, ping_result) =
            tokio::join!(self.modem.query(member), self.ping.probe(member));

        match modem_result {
            Ok(status) => {
                let mut m = Metrics::empty(CollectionMethod::NativeApi);
                m.signal_dbm = Some(status.signal_dbm);
                m.operator = status.operator;
                if let Ok(outcome) = &ping_result {
                    m.latency_ms = outcome.latency_ms;
                    m.loss_pct = Some(outcome.loss_pct);
                    m.jitter_ms = outcome.jitter_ms;
                }
                Ok(m)
            }
            Err(modem_err) => {
                tracing::debug!(member = %member.name, "modem query failed: {modem_err}");
                let outcome = ping_result?;

                // Byte-counter delta across the probe window, as a
                // throughput sanity check for the estimate.
                if let (Some(before), Some(after)) =
                    (counters_before, read_iface_counters(&member.iface))
                {
                    let moved = after.rx_bytes.saturating_sub(before.rx_bytes)
                        + after.tx_bytes.saturating_sub(before.tx_bytes);
                    tracing::debug!(member = %member.name, bytes_moved = moved, "interface estimate");
                }

                Ok(metrics_from_ping(
                    &outcome,
                    CollectionMethod::InterfaceEstimate,
                ))
            }
        }
    }
}

/// Pull signal/operator/network out of an RPC-bus modem payload. Field
/// names differ across modem vendors, so try the usual spellings.
pub(crate) fn parse_rpc_status(value: &serde_json::Value) -> Option<ModemStatus> {
    let number = |keys: &[&str]| -> Option<f64> {
        keys.iter().find_map(|k| value.get(k).and_then(|v| v.as_f64()))
    };
    let text = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| value.get(k).and_then(|v| v.as_str()))
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };

    let signal_dbm = number(&["rssi", "signal", "rsrp"])?;
    Some(ModemStatus {
        signal_dbm,
        operator: text(&["operator", "opername"]),
        network: text(&["net_mode", "network", "technology"]),
    })
}

/// `gsmctl -q` prints the signal level in dBm, possibly suffixed.
pub(crate) fn parse_at_signal(out: &str) -> Option<f64> {
    out.split_whitespace()
        .next()?
        .trim_end_matches("dBm")
        .parse::<f64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ─── RPC Payload Parsing ────────────────────────────────────────────

    #[test]
    fn parse_rpc_payload_full() {
        let v = json!({
            "rssi": -71.0,
            "operator": "Telia",
            "net_mode": "LTE"
        });
        let status = parse_rpc_status(&v).unwrap();
        assert_eq!(status.signal_dbm, -71.0);
        assert_eq!(status.operator.as_deref(), Some("Telia"));
        assert_eq!(status.network.as_deref(), Some("LTE"));
    }

    #[test]
    fn parse_rpc_payload_alternate_keys() {
        let v = json!({ "rsrp": -98.0, "opername": "Vodafone" });
        let status = parse_rpc_status(&v).unwrap();
        assert_eq!(status.signal_dbm, -98.0);
        assert_eq!(status.operator.as_deref(), Some("Vodafone"));
    }

    #[test]
    fn parse_rpc_payload_without_signal_fails() {
        let v = json!({ "operator": "Telia" });
        assert!(parse_rpc_status(&v).is_none());
    }

    // ─── AT Bridge Parsing ──────────────────────────────────────────────

    #[test]
    fn parse_at_signal_plain() {
        assert_eq!(parse_at_signal("-85\n"), Some(-85.0));
    }

    #[test]
    fn parse_at_signal_with_unit() {
        assert_eq!(parse_at_signal("-73dBm\n"), Some(-73.0));
    }

    #[test]
    fn parse_at_signal_garbage() {
        assert_eq!(parse_at_signal("ERROR\n"), None);
        assert_eq!(parse_at_signal(""), None);
    }
}
