//! Starlink collector.
//!
//! Primary path: the dish's local management endpoint, reachable over
//! gRPC (via `grpcurl`, which the deployment ships) or plain HTTP. The
//! configured flavor is tried first and the other on failure. Fallback
//! path: ping through the member's interface, which populates latency and
//! loss only and marks the API inaccessible.

use std::time::Duration;

use tokio::process::Command;

use uplink_common::models::{CollectionMethod, Member, Metrics};

use super::ping::{metrics_from_ping, PingProbe};
use super::CollectError;

/// Fields this core consumes from the dish status payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DishStatus {
    pub latency_ms: Option<f64>,
    pub loss_pct: Option<f64>,
    pub obstruction_pct: Option<f64>,
    pub signal_dbm: Option<f64>,
}

impl DishStatus {
    fn has_any_field(&self) -> bool {
        self.latency_ms.is_some()
            || self.loss_pct.is_some()
            || self.obstruction_pct.is_some()
            || self.signal_dbm.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiFlavor {
    Grpc,
    Http,
}

pub struct StarlinkCollector {
    host: String,
    port: u16,
    grpc_first: bool,
    timeout: Duration,
    http: reqwest::Client,
    ping: PingProbe,
}

impl StarlinkCollector {
    pub fn new(
        host: String,
        port: u16,
        grpc_first: bool,
        timeout: Duration,
        ping: PingProbe,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        StarlinkCollector {
            host,
            port,
            grpc_first,
            timeout,
            http,
            ping,
        }
    }

    pub async fn collect(&self, member: &Member) -> Result<Metrics, CollectError> {
        let order = if self.grpc_first {
            [ApiFlavor::Grpc, ApiFlavor::Http]
        } else {
            [ApiFlavor::Http, ApiFlavor::Grpc]
        };

        for flavor in order {
            match self.query(flavor).await {
                Ok(status) if status.has_any_field() => {
                    let mut m = Metrics::empty(CollectionMethod::NativeApi);
                    m.latency_ms = status.latency_ms;
                    m.loss_pct = status.loss_pct;
                    m.obstruction_pct = status.obstruction_pct;
                    m.signal_dbm = status.signal_dbm;
                    return Ok(m);
                }
                Ok(_) => {
                    tracing::debug!(member = %member.name, ?flavor, "dish payload carried no fields");
                }
                Err(e) => {
                    tracing::debug!(member = %member.name, ?flavor, "dish query failed: {e}");
                }
            }
        }

        // Both API paths down: degrade to ping through the interface.
        let outcome = self.ping.probe(member).await?;
        Ok(metrics_from_ping(&outcome, CollectionMethod::FallbackPing))
    }

    async fn query(&self, flavor: ApiFlavor) -> Result<DishStatus, CollectError> {
        let value = match flavor {
            ApiFlavor::Http => self.query_http().await?,
            ApiFlavor::Grpc => self.query_grpc().await?,
        };
        Ok(parse_dish_status(&value))
    }

    async fn query_http(&self) -> Result<serde_json::Value, CollectError> {
        let url = format!("http://{}:{}/status", self.host, self.port);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CollectError::NoData {
                member: self.host.clone(),
                detail: format!("dish http: {e}"),
            })?;
        response.json().await.map_err(|e| CollectError::NoData {
            member: self.host.clone(),
            detail: format!("dish http body: {e}"),
        })
    }

    async fn query_grpc(&self) -> Result<serde_json::Value, CollectError> {
        let endpoint = format!("{}:{}", self.host, self.port);
        let mut cmd = Command::new("grpcurl");
        cmd.arg("-plaintext")
            .arg("-max-time")
            .arg(self.timeout.as_secs().max(1).to_string())
            .arg("-d")
            .arg("{\"get_status\":{}}")
            .arg(&endpoint)
            .arg("SpaceX.API.Device.Device/Handle")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout + Duration::from_secs(1), cmd.output())
            .await
            .map_err(|_| CollectError::DeadlineExceeded)?
            .map_err(|e| CollectError::NoData {
                member: endpoint.clone(),
                detail: format!("failed to spawn grpcurl: {e}"),
            })?;

        if !output.status.success() {
            return Err(CollectError::NoData {
                member: endpoint,
                detail: format!(
                    "grpcurl exited {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| CollectError::NoData {
            member: endpoint,
            detail: format!("grpcurl output: {e}"),
        })
    }
}

/// Extract the consumed fields from a dish status payload. Tolerates both
/// the bare status object and the gRPC response wrapper.
pub(crate) fn parse_dish_status(value: &serde_json::Value) -> DishStatus {
    let status = value
        .pointer("/dishGetStatus")
        .or_else(|| value.pointer("/dish_get_status"))
        .unwrap_or(value);

    let number = |keys: &[&str]| -> Option<f64> {
        keys.iter().find_map(|k| status.get(k).and_then(|v| v.as_f64()))
    };

    DishStatus {
        latency_ms: number(&["popPingLatencyMs", "pop_ping_latency_ms"]),
        loss_pct: number(&["popPingDropRate", "pop_ping_drop_rate"])
            .map(|rate| (rate * 100.0).clamp(0.0, 100.0)),
        obstruction_pct: status
            .pointer("/obstructionStats/fractionObstructed")
            .or_else(|| status.pointer("/obstruction_stats/fraction_obstructed"))
            .and_then(|v| v.as_f64())
            .map(|fraction| (fraction * 100.0).clamp(0.0, 100.0)),
        signal_dbm: number(&["signalDbm", "signal_dbm"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_wrapped_grpc_payload() {
        let v = json!({
            "dishGetStatus": {
                "popPingLatencyMs": 38.5,
                "popPingDropRate": 0.015,
                "obstructionStats": { "fractionObstructed": 0.02 },
                "snr": 8.0
            }
        });
        let status = parse_dish_status(&v);
        assert_eq!(status.latency_ms, Some(38.5));
        assert!((status.loss_pct.unwrap() - 1.5).abs() < 1e-9);
        assert!((status.obstruction_pct.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(status.signal_dbm, None, "snr is not a dBm reading");
    }

    #[test]
    fn parse_bare_http_payload() {
        let v = json!({
            "pop_ping_latency_ms": 45.0,
            "pop_ping_drop_rate": 0.0,
            "signal_dbm": -68.0
        });
        let status = parse_dish_status(&v);
        assert_eq!(status.latency_ms, Some(45.0));
        assert_eq!(status.loss_pct, Some(0.0));
        assert_eq!(status.signal_dbm, Some(-68.0));
        assert_eq!(status.obstruction_pct, None);
    }

    #[test]
    fn drop_rate_clamped() {
        let v = json!({ "popPingDropRate": 1.8 });
        assert_eq!(parse_dish_status(&v).loss_pct, Some(100.0));
    }

    #[test]
    fn empty_payload_has_no_fields() {
        let status = parse_dish_status(&json!({}));
        assert!(!status.has_any_field());
    }
}
