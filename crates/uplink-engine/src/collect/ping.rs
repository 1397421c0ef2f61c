//! Ping probe — the universal fallback path.
//!
//! Spawns the system `ping` bound to the member's interface and parses
//! the summary lines. Handles both iputils and busybox output shapes,
//! which matters on router firmware.

use std::time::Duration;

use tokio::process::Command;

use uplink_common::models::{CollectionMethod, Member, Metrics};

use super::ifinfo::resolve_iface_ipv4;
use super::CollectError;

/// Parsed ping summary.
#[derive(Debug, Clone, PartialEq)]
pub struct PingOutcome {
    /// Average round-trip time. Absent when every probe was lost.
    pub latency_ms: Option<f64>,
    pub loss_pct: f64,
    /// rtt mdev where the ping implementation reports it.
    pub jitter_ms: Option<f64>,
}

/// Reusable probe configuration.
#[derive(Debug, Clone)]
pub struct PingProbe {
    pub targets: Vec<String>,
    pub count: u32,
    pub timeout_s: u64,
}

impl PingProbe {
    /// Ping through the member's interface, trying the member's configured
    /// target override first and then each global target until one
    /// produces a parseable summary.
    pub async fn probe(&self, member: &Member) -> Result<PingOutcome, CollectError> {
        let iface = &member.iface;
        if resolve_iface_ipv4(iface).is_none() {
            return Err(CollectError::NoData {
                member: member.name.clone(),
                detail: format!("interface {iface} has no IPv4 address"),
            });
        }

        let override_target = member.config.get("ping_target").cloned();
        let targets = override_target
            .iter()
            .chain(self.targets.iter());

        for target in targets {
            match self.ping_once(iface, target).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::debug!(member = %member.name, target, "ping target failed: {e}");
                }
            }
        }

        Err(CollectError::NoData {
            member: member.name.clone(),
            detail: "no ping target answered".into(),
        })
    }

    async fn ping_once(&self, iface: &str, target: &str) -> Result<PingOutcome, CollectError> {
        let mut cmd = Command::new("ping");
        cmd.arg("-I")
            .arg(iface)
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(self.timeout_s.to_string())
            .arg("-q")
            .arg(target)
            .kill_on_drop(true);

        // Worst case: every probe waits out its timeout, plus slack for
        // process startup.
        let budget = Duration::from_secs(self.timeout_s * self.count as u64 + 2);
        let output = tokio::time::timeout(budget, cmd.output())
            .await
            .map_err(|_| CollectError::DeadlineExceeded)?
            .map_err(|e| CollectError::NoData {
                member: iface.to_string(),
                detail: format!("failed to spawn ping: {e}"),
            })?;

        // ping exits non-zero on 100% loss but still prints the summary,
        // so parse stdout regardless of status.
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_output(&stdout).ok_or_else(|| CollectError::NoData {
            member: iface.to_string(),
            detail: format!("unparseable ping output for {target}"),
        })
    }
}

/// Build a fallback-ping metrics record from a probe outcome.
pub fn metrics_from_ping(outcome: &PingOutcome, method: CollectionMethod) -> Metrics {
    let mut m = Metrics::empty(method);
    m.api_accessible = false;
    m.latency_ms = outcome.latency_ms;
    m.loss_pct = Some(outcome.loss_pct);
    m.jitter_ms = outcome.jitter_ms;
    m
}

/// Parse the ping summary. iputils prints
/// `rtt min/avg/max/mdev = a/b/c/d ms`, busybox prints
/// `round-trip min/avg/max = a/b/c ms`; both print a `% packet loss` line.
pub(crate) fn parse_ping_output(out: &str) -> Option<PingOutcome> {
    let mut loss_pct: Option<f64> = None;
    let mut latency_ms: Option<f64> = None;
    let mut jitter_ms: Option<f64> = None;

    for line in out.lines() {
        if line.contains("packet loss") {
            loss_pct = line
                .split_whitespace()
                .find_map(|tok| tok.strip_suffix('%'))
                .and_then(|v| v.parse::<f64>().ok());
        } else if line.starts_with("rtt ") || line.starts_with("round-trip ") {
            let values = line.split('=').nth(1)?.trim();
            let values = values.trim_end_matches(" ms");
            let parts: Vec<&str> = values.split('/').collect();
            if parts.len() >= 2 {
                latency_ms = parts[1].trim().parse::<f64>().ok();
            }
            if parts.len() >= 4 {
                jitter_ms = parts[3].trim().parse::<f64>().ok();
            }
        }
    }

    loss_pct.map(|loss_pct| PingOutcome {
        latency_ms,
        loss_pct: loss_pct.clamp(0.0, 100.0),
        jitter_ms,
    })
}
