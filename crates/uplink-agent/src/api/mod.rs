//! Control API route tree.
//!
//! GET  /healthz                      — readiness probe
//! GET  /metrics                      — Prometheus scrape
//! GET  /api/status                   — full status snapshot
//! GET  /api/members                  — member list with latest scores
//! GET  /api/events                   — event tail
//! GET  /api/config                   — active configuration
//! POST /api/switch                   — operator-forced switch
//! POST /api/reload                   — re-read the config file
//! POST /api/members/{name}/eligible  — set member eligibility

pub mod metrics;
pub mod status;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(status::healthz))
        .route("/metrics", get(metrics::handler))
        .route("/api/status", get(status::get_status))
        .route("/api/members", get(status::get_members))
        .route("/api/events", get(status::get_events))
        .route("/api/config", get(status::get_config))
        .route("/api/switch", post(status::force_switch))
        .route("/api/reload", post(status::reload_config))
        .route("/api/members/{name}/eligible", post(status::set_eligibility))
}
