//! # Route Policy Port
//!
//! The one seam through which the active-member decision becomes a routing
//! change. Two backends, selected by `use_policy_backend`:
//!
//! - [`PolicyManagerBackend`] — asks the platform's multi-WAN policy
//!   manager (over the RPC bus) to prefer an interface. Preferred when the
//!   policy daemon is installed.
//! - [`NetifdBackend`] — rewrites the default route's device and metric
//!   directly with `ip route`.
//!
//! Only the controller calls this port; never both backends at once.

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("failed to spawn {cmd}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{cmd} exited with status {status}: {stderr}")]
    Failed {
        cmd: String,
        status: i32,
        stderr: String,
    },
    #[error("{cmd} did not finish within {timeout:?}")]
    Timeout { cmd: String, timeout: Duration },
}

/// Port to the routing-policy backend. `set_preferred` is atomic at this
/// boundary: it either takes effect or reports an error.
pub trait RoutePolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn set_preferred(&self, iface: &str) -> Result<(), RouteError>;
}

// ── Policy-manager backend ──────────────────────────────────────────

/// Drives the multi-WAN policy manager over the RPC bus.
pub struct PolicyManagerBackend {
    timeout: Duration,
}

impl PolicyManagerBackend {
    pub fn new(timeout: Duration) -> Self {
        PolicyManagerBackend { timeout }
    }
}

impl RoutePolicy for PolicyManagerBackend {
    fn name(&self) -> &'static str {
        "policy_manager"
    }

    fn set_preferred(&self, iface: &str) -> Result<(), RouteError> {
        let payload = format!("{{\"interface\":\"{iface}\"}}");
        run_checked(
            Command::new("ubus")
                .arg("-S")
                .arg("call")
                .arg("mwan3")
                .arg("set_preferred")
                .arg(&payload),
            self.timeout,
        )
    }
}

// ── Direct netifd backend ───────────────────────────────────────────

/// Rewrites the default route directly. Used where no policy manager is
/// available.
pub struct NetifdBackend {
    timeout: Duration,
}

impl NetifdBackend {
    pub fn new(timeout: Duration) -> Self {
        NetifdBackend { timeout }
    }
}

impl RoutePolicy for NetifdBackend {
    fn name(&self) -> &'static str {
        "netifd"
    }

    fn set_preferred(&self, iface: &str) -> Result<(), RouteError> {
        run_checked(
            Command::new("ip")
                .arg("route")
                .arg("replace")
                .arg("default")
                .arg("dev")
                .arg(iface)
                .arg("metric")
                .arg("1"),
            self.timeout,
        )
    }
}

// ── No-op backend ───────────────────────────────────────────────────

/// Backend that accepts every request without touching the system.
/// Used in simulation mode.
pub struct NoopRoutePolicy;

impl RoutePolicy for NoopRoutePolicy {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn set_preferred(&self, iface: &str) -> Result<(), RouteError> {
        tracing::info!(iface, "simulated route change");
        Ok(())
    }
}

// ── Process plumbing ────────────────────────────────────────────────

fn run_checked(cmd: &mut Command, timeout: Duration) -> Result<(), RouteError> {
    let display = format!("{cmd:?}");
    let child = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RouteError::Spawn {
            cmd: display.clone(),
            source,
        })?;

    let output = wait_with_timeout(child, timeout).ok_or(RouteError::Timeout {
        cmd: display.clone(),
        timeout,
    })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(RouteError::Failed {
            cmd: display,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Wait for a child process, killing it when the deadline passes.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Option<std::process::Output> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => return None,
        }
    }
}
