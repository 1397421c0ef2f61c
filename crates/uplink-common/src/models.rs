//! Data models for the Uplink failover daemon.
//!
//! These types are shared between the engine (which produces them) and the
//! control API (which serves subsets of them as JSON).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Member ──────────────────────────────────────────────────────────

/// The kind of uplink a member represents. Governs which collector probes
/// it and which scoring factors apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberClass {
    Starlink,
    Cellular,
    Wifi,
    Lan,
    Other,
}

impl MemberClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberClass::Starlink => "starlink",
            MemberClass::Cellular => "cellular",
            MemberClass::Wifi => "wifi",
            MemberClass::Lan => "lan",
            MemberClass::Other => "other",
        }
    }
}

impl std::fmt::Display for MemberClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemberClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starlink" => Ok(MemberClass::Starlink),
            "cellular" => Ok(MemberClass::Cellular),
            "wifi" => Ok(MemberClass::Wifi),
            "lan" => Ok(MemberClass::Lan),
            "other" => Ok(MemberClass::Other),
            other => Err(format!("unknown member class: {other}")),
        }
    }
}

/// A candidate uplink managed by the failover system.
///
/// Created by discovery, refreshed by discovery, eligibility owned by the
/// controller. Removed when discovery has missed it twice in a row and it
/// has not been active within the configured grace period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// Stable name, unique within the process (e.g. "mob1s1a1").
    pub name: String,
    /// Underlying network interface (e.g. "wwan0").
    pub iface: String,
    pub class: MemberClass,
    /// Static priority hint. Higher wins ties; also feeds the class bias.
    pub weight: u32,
    pub eligible: bool,
    /// Free-form per-member settings (APN, ping target override, ...).
    #[serde(default)]
    pub config: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Member {
    pub fn new(name: impl Into<String>, iface: impl Into<String>, class: MemberClass) -> Self {
        let now = Utc::now();
        Member {
            name: name.into(),
            iface: iface.into(),
            class,
            weight: 50,
            eligible: true,
            config: HashMap::new(),
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Check the member invariants: non-empty name and interface.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.is_empty() {
            return Err(ModelError::EmptyName);
        }
        if self.iface.is_empty() {
            return Err(ModelError::EmptyInterface {
                member: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("member name must not be empty")]
    EmptyName,
    #[error("member {member} has no interface")]
    EmptyInterface { member: String },
}

// ── Metrics ─────────────────────────────────────────────────────────

/// How a metrics record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    /// The member's native status API answered.
    NativeApi,
    /// API unreachable; values from a ping probe through the interface.
    FallbackPing,
    /// Values estimated from interface byte counters (plus ping).
    InterfaceEstimate,
}

impl CollectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMethod::NativeApi => "native_api",
            CollectionMethod::FallbackPing => "fallback_ping",
            CollectionMethod::InterfaceEstimate => "interface_estimate",
        }
    }
}

/// One observation of one member at one instant.
///
/// Every numeric field is optional: a fallback path populates what it can
/// and the scorer redistributes the weight of whatever is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub ts: DateTime<Utc>,
    pub latency_ms: Option<f64>,
    /// Packet loss in percent (0–100).
    pub loss_pct: Option<f64>,
    pub jitter_ms: Option<f64>,
    /// Signal strength in dBm (cellular / wifi / starlink only).
    pub signal_dbm: Option<f64>,
    /// Sky obstruction in percent (starlink only).
    pub obstruction_pct: Option<f64>,
    /// Network operator / provider tag, when the API reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub method: CollectionMethod,
    /// Whether the member's native API was reachable this cycle.
    pub api_accessible: bool,
}

impl Metrics {
    /// An empty record for the given method, stamped now.
    pub fn empty(method: CollectionMethod) -> Self {
        Metrics {
            ts: Utc::now(),
            latency_ms: None,
            loss_pct: None,
            jitter_ms: None,
            signal_dbm: None,
            obstruction_pct: None,
            operator: None,
            method,
            api_accessible: method == CollectionMethod::NativeApi,
        }
    }

    /// True when at least one numeric field is populated.
    pub fn has_any_field(&self) -> bool {
        self.latency_ms.is_some()
            || self.loss_pct.is_some()
            || self.jitter_ms.is_some()
            || self.signal_dbm.is_some()
            || self.obstruction_pct.is_some()
    }

    /// Check value-range invariants. Out-of-range upstream readings are a
    /// collector bug, not an operational condition.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(l) = self.latency_ms {
            if l < 0.0 {
                return Err(format!("negative latency: {l}"));
            }
        }
        if let Some(l) = self.loss_pct {
            if !(0.0..=100.0).contains(&l) {
                return Err(format!("loss out of range: {l}"));
            }
        }
        if let Some(j) = self.jitter_ms {
            if j < 0.0 {
                return Err(format!("negative jitter: {j}"));
            }
        }
        if !self.has_any_field() && self.method == CollectionMethod::NativeApi {
            return Err("native_api record with no numeric fields".into());
        }
        Ok(())
    }
}

// ── Score ───────────────────────────────────────────────────────────

/// Derived per (member, cycle). All three values are clamped to [0, 100].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Score {
    /// This cycle's raw score.
    pub instant: f64,
    /// Exponentially weighted moving average of `instant`.
    pub ewma: f64,
    /// The value the decision engine compares: ewma plus class bias.
    #[serde(rename = "final")]
    pub final_score: f64,
}

// ── Events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sample,
    Switch,
    RejectHysteresis,
    RejectCooldown,
    CollectorPartial,
    CollectorFail,
    MemberAdded,
    MemberRemoved,
    SkippedTick,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Sample => "sample",
            EventKind::Switch => "switch",
            EventKind::RejectHysteresis => "reject_hysteresis",
            EventKind::RejectCooldown => "reject_cooldown",
            EventKind::CollectorPartial => "collector_partial",
            EventKind::CollectorFail => "collector_fail",
            EventKind::MemberAdded => "member_added",
            EventKind::MemberRemoved => "member_removed",
            EventKind::SkippedTick => "skipped_tick",
        }
    }
}

/// Decision-engine or controller side-effect record. Append-only; trimmed
/// by the telemetry store's retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Previous active member, for `switch` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// New active member, for `switch` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub detail: String,
}

impl Event {
    pub fn new(kind: EventKind, member: Option<&str>, detail: impl Into<String>) -> Self {
        Event {
            ts: Utc::now(),
            kind,
            member: member.map(str::to_string),
            from: None,
            to: None,
            detail: detail.into(),
        }
    }

    pub fn switch(from: Option<&str>, to: &str, detail: impl Into<String>) -> Self {
        Event {
            ts: Utc::now(),
            kind: EventKind::Switch,
            member: Some(to.to_string()),
            from: from.map(str::to_string),
            to: Some(to.to_string()),
            detail: detail.into(),
        }
    }
}

// ── Health state machine ────────────────────────────────────────────

/// Per-member health, driven by thresholds on the final score:
///
/// ```text
/// Unknown → Healthy ⇄ Degraded → Unhealthy → Recovering → Healthy
/// ```
///
/// `Recovering` requires a run of healthy-band samples before the member
/// is trusted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Recovering,
}

impl MemberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Unknown => "unknown",
            MemberState::Healthy => "healthy",
            MemberState::Degraded => "degraded",
            MemberState::Unhealthy => "unhealthy",
            MemberState::Recovering => "recovering",
        }
    }
}

// ── Status snapshot ─────────────────────────────────────────────────

/// Most recent failure surfaced to operators, cleared when the condition
/// resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub component: String,
    pub message: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Backend,
    Collection,
    Invariant,
}

/// One member's row in the status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberStatus {
    #[serde(flatten)]
    pub member: Member,
    pub state: MemberState,
    pub score: Option<Score>,
    pub latest: Option<Metrics>,
}

/// Global process counters, monotonically increasing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub switches_total: u64,
    pub collector_errors_total: u64,
    pub decision_cycles_total: u64,
    pub skipped_ticks_total: u64,
}

/// Read-only view served by the control API and the metrics scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub active_member: Option<String>,
    pub members: Vec<MemberStatus>,
    pub counters: Counters,
    pub last_error: Option<LastError>,
    pub uptime_s: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Member Validation ──────────────────────────────────────────────

    #[test]
    fn member_with_name_and_iface_is_valid() {
        let m = Member::new("starlink", "eth1", MemberClass::Starlink);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let m = Member::new("", "eth1", MemberClass::Starlink);
        assert_eq!(m.validate(), Err(ModelError::EmptyName));
    }

    #[test]
    fn empty_iface_rejected() {
        let m = Member::new("wan", "", MemberClass::Lan);
        assert!(matches!(
            m.validate(),
            Err(ModelError::EmptyInterface { .. })
        ));
    }

    // ─── Class Parsing ──────────────────────────────────────────────────

    #[test]
    fn class_round_trips_through_str() {
        for class in [
            MemberClass::Starlink,
            MemberClass::Cellular,
            MemberClass::Wifi,
            MemberClass::Lan,
            MemberClass::Other,
        ] {
            assert_eq!(class.as_str().parse::<MemberClass>(), Ok(class));
        }
    }

    #[test]
    fn unknown_class_rejected() {
        assert!("satellite".parse::<MemberClass>().is_err());
    }

    // ─── Metrics Invariants ─────────────────────────────────────────────

    #[test]
    fn empty_fallback_record_has_no_fields() {
        let m = Metrics::empty(CollectionMethod::FallbackPing);
        assert!(!m.has_any_field());
        assert!(!m.api_accessible);
    }

    #[test]
    fn negative_latency_rejected() {
        let mut m = Metrics::empty(CollectionMethod::FallbackPing);
        m.latency_ms = Some(-1.0);
        assert!(m.validate().is_err());
    }

    #[test]
    fn loss_above_100_rejected() {
        let mut m = Metrics::empty(CollectionMethod::FallbackPing);
        m.loss_pct = Some(101.0);
        assert!(m.validate().is_err());
    }

    #[test]
    fn empty_native_api_record_rejected() {
        let m = Metrics::empty(CollectionMethod::NativeApi);
        assert!(m.validate().is_err());
    }

    #[test]
    fn partial_record_is_valid() {
        let mut m = Metrics::empty(CollectionMethod::FallbackPing);
        m.latency_ms = Some(42.0);
        m.loss_pct = Some(0.0);
        assert!(m.validate().is_ok());
        assert!(m.has_any_field());
    }

    // ─── Event Construction ─────────────────────────────────────────────

    #[test]
    fn switch_event_carries_from_and_to() {
        let e = Event::switch(Some("starlink"), "mob1s1a1", "score 42 < 61");
        assert_eq!(e.kind, EventKind::Switch);
        assert_eq!(e.from.as_deref(), Some("starlink"));
        assert_eq!(e.to.as_deref(), Some("mob1s1a1"));
    }

    #[test]
    fn event_serializes_without_null_members() {
        let e = Event::new(EventKind::SkippedTick, None, "tick in flight");
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("\"member\""));
        assert!(json.contains("skipped_tick"));
    }
}
