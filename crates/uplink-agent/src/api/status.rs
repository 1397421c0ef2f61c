//! Status & control endpoints.
//!
//! Every response carries a top-level `ok` flag; writes return the state
//! they produced. Writes that touch the decision state take the engine
//! lock, which serializes them with decision cycles.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use uplink_common::models::ErrorKind;
use uplink_engine::controller::ControllerError;

use crate::state::AppState;

// ── Error plumbing ──────────────────────────────────────────────────

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "ok": false, "error": self.message }))).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        match &err {
            ControllerError::UnknownMember(_) => ApiError::not_found(err.to_string()),
            ControllerError::Ineligible(_)
            | ControllerError::LastCollectionFailed(_)
            | ControllerError::ActiveMismatch { .. } => ApiError::conflict(err.to_string()),
            ControllerError::Invalid(_) => ApiError::bad_request(err.to_string()),
            ControllerError::Backend(_) => ApiError::bad_gateway(err.to_string()),
        }
    }
}

// ── Read endpoints ──────────────────────────────────────────────────

pub async fn healthz(State(state): State<AppState>) -> Response {
    if state.ready().await {
        Json(json!({ "ok": true, "ready": true })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ok": false, "ready": false })),
        )
            .into_response()
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.snapshot().await;
    Json(json!({ "ok": true, "status": snapshot }))
}

pub async fn get_members(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.snapshot().await;
    Json(json!({
        "ok": true,
        "active": snapshot.active_member,
        "members": snapshot.members,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Window size in seconds, counted back from now.
    #[serde(default = "default_since_s")]
    pub since_s: u64,
    #[serde(default = "default_max")]
    pub max: usize,
}

fn default_since_s() -> u64 {
    3600
}

fn default_max() -> usize {
    100
}

pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<serde_json::Value> {
    let since = Utc::now() - chrono::Duration::seconds(query.since_s as i64);
    let events = state.store().events_since(since, query.max);
    Json(json!({ "ok": true, "events": events }))
}

pub async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "config": &*state.config() }))
}

// ── Write endpoints ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub member: String,
}

/// Operator-forced switch. Bypasses hysteresis and cooldown; still refuses
/// a member whose most recent collection failed.
pub async fn force_switch(
    State(state): State<AppState>,
    Json(req): Json<SwitchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine().lock().await;
    let controller = state.controller().clone();
    tokio::task::block_in_place(|| engine.force_switch(&controller, &req.member, Utc::now()))?;
    Ok(Json(json!({
        "ok": true,
        "active": state.controller().active_name(),
    })))
}

/// Re-read the config file. A validation failure is surfaced here and the
/// running config stays untouched.
pub async fn reload_config(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.reload_config().await {
        Ok(cfg) => {
            state.stats().clear_last_error();
            // An explicit reload is also an explicit request for a
            // discovery sweep.
            let mut discovery = state.discovery().lock().await;
            discovery.refresh(state.controller(), Utc::now());
            Ok(Json(json!({ "ok": true, "config": &*cfg })))
        }
        Err(e) => {
            state
                .stats()
                .set_last_error(ErrorKind::Config, "api", e.to_string());
            Err(ApiError::bad_request(e.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EligibilityRequest {
    pub eligible: bool,
}

pub async fn set_eligibility(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<EligibilityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Serialize with decision cycles so a cycle never sees a half-applied
    // eligibility change.
    let _engine = state.engine().lock().await;
    let member = state.controller().set_eligibility(&name, req.eligible)?;
    Ok(Json(json!({ "ok": true, "member": member })))
}
