//! Prometheus metrics endpoint.
//!
//! `GET /metrics` — renders the current status snapshot in Prometheus text
//! exposition format. Requires no authentication (standard Prometheus
//! practice).

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use uplink_common::metrics::render_prometheus;

use crate::state::AppState;

pub async fn handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot().await;
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        render_prometheus(&snapshot),
    )
}
