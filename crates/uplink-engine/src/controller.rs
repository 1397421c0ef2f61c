//! # Switching Controller
//!
//! Owns the authoritative member set and the active-member pointer, and is
//! the only component allowed to mutate the route-policy backend.
//!
//! Mutations (`switch`, `set_members`, `set_eligibility`) are serialized by
//! one exclusive gate; reads copy small metadata out under a short lock so
//! they never wait on a backend call in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use uplink_common::models::{Event, Member, ModelError};

use crate::route::{RouteError, RoutePolicy};
use crate::sink::{emit, EventSink};
use crate::stats::RuntimeStats;
use crate::store::TelemetryStore;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("unknown member: {0}")]
    UnknownMember(String),
    #[error("member {0} is not eligible")]
    Ineligible(String),
    #[error("member {0}'s most recent collection failed")]
    LastCollectionFailed(String),
    #[error("active member changed (expected {expected:?}, found {found:?})")]
    ActiveMismatch {
        expected: Option<String>,
        found: Option<String>,
    },
    #[error(transparent)]
    Invalid(#[from] ModelError),
    #[error("route backend: {0}")]
    Backend(#[from] RouteError),
}

struct ControllerInner {
    members: HashMap<String, Member>,
    active: Option<String>,
    /// When each member last stopped being active; feeds the discovery
    /// removal grace period.
    last_active: HashMap<String, DateTime<Utc>>,
    /// Operator-set eligibility, reapplied across discovery refreshes.
    eligibility_overrides: HashMap<String, bool>,
}

pub struct Controller {
    inner: Mutex<ControllerInner>,
    /// Serializes mutations; never held by readers.
    switch_gate: Mutex<()>,
    policy: Box<dyn RoutePolicy>,
    store: Arc<TelemetryStore>,
    sink: Arc<dyn EventSink>,
    stats: Arc<RuntimeStats>,
}

impl Controller {
    pub fn new(
        policy: Box<dyn RoutePolicy>,
        store: Arc<TelemetryStore>,
        sink: Arc<dyn EventSink>,
        stats: Arc<RuntimeStats>,
    ) -> Self {
        Controller {
            inner: Mutex::new(ControllerInner {
                members: HashMap::new(),
                active: None,
                last_active: HashMap::new(),
                eligibility_overrides: HashMap::new(),
            }),
            switch_gate: Mutex::new(()),
            policy,
            store,
            sink,
            stats,
        }
    }

    /// Check member invariants before acceptance.
    pub fn validate(&self, member: &Member) -> Result<(), ControllerError> {
        member.validate()?;
        Ok(())
    }

    /// Replace the member set. Invalid or duplicate records are logged and
    /// rejected; the rest are applied. Preserves the active member when it
    /// is still present, existing creation timestamps, and operator
    /// eligibility overrides.
    pub fn set_members(&self, members: Vec<Member>) {
        let _gate = self.switch_gate.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();

        let mut next: HashMap<String, Member> = HashMap::with_capacity(members.len());
        for mut m in members {
            if let Err(e) = m.validate() {
                tracing::warn!("rejecting member from discovery: {e}");
                continue;
            }
            if next.contains_key(&m.name) {
                tracing::warn!(member = %m.name, "rejecting duplicate member name from discovery");
                continue;
            }
            if let Some(existing) = inner.members.get(&m.name) {
                m.created_at = existing.created_at;
            }
            if let Some(&forced) = inner.eligibility_overrides.get(&m.name) {
                m.eligible = forced;
            }
            next.insert(m.name.clone(), m);
        }

        if let Some(active) = inner.active.clone() {
            if !next.contains_key(&active) {
                tracing::warn!(member = %active, "active member disappeared from member set");
                inner.last_active.insert(active, Utc::now());
                inner.active = None;
            }
        }

        inner.members = next;
    }

    /// Snapshot of all members.
    pub fn members(&self) -> Vec<Member> {
        let inner = self.inner.lock().unwrap();
        let mut members: Vec<Member> = inner.members.values().cloned().collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    pub fn member(&self, name: &str) -> Option<Member> {
        self.inner.lock().unwrap().members.get(name).cloned()
    }

    pub fn active_member(&self) -> Option<Member> {
        let inner = self.inner.lock().unwrap();
        inner
            .active
            .as_ref()
            .and_then(|name| inner.members.get(name))
            .cloned()
    }

    pub fn active_name(&self) -> Option<String> {
        self.inner.lock().unwrap().active.clone()
    }

    /// Whether `name` is active now or stopped being active less than
    /// `grace` ago.
    pub fn was_active_within(&self, name: &str, grace: chrono::Duration, now: DateTime<Utc>) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.active.as_deref() == Some(name) {
            return true;
        }
        inner
            .last_active
            .get(name)
            .is_some_and(|&t| now - t < grace)
    }

    /// Operator override of a member's eligibility. Survives discovery
    /// refreshes until the member is removed.
    pub fn set_eligibility(&self, name: &str, eligible: bool) -> Result<Member, ControllerError> {
        let _gate = self.switch_gate.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();
        let member = inner
            .members
            .get_mut(name)
            .ok_or_else(|| ControllerError::UnknownMember(name.to_string()))?;
        member.eligible = eligible;
        let member = member.clone();
        inner
            .eligibility_overrides
            .insert(name.to_string(), eligible);
        tracing::info!(member = name, eligible, "eligibility updated");
        Ok(member)
    }

    /// Effect a switch at the route-policy backend.
    ///
    /// `from` must match the current active member; the in-memory pointer
    /// is updated optimistically and reverted when the backend reports
    /// failure, so a failed switch has no side effects.
    pub fn switch(
        &self,
        from: Option<&str>,
        to: &str,
        detail: &str,
    ) -> Result<(), ControllerError> {
        let _gate = self.switch_gate.lock().unwrap();

        let (member, prev) = {
            let mut inner = self.inner.lock().unwrap();
            let member = inner
                .members
                .get(to)
                .cloned()
                .ok_or_else(|| ControllerError::UnknownMember(to.to_string()))?;
            if !member.eligible {
                return Err(ControllerError::Ineligible(to.to_string()));
            }
            if inner.active.as_deref() != from {
                return Err(ControllerError::ActiveMismatch {
                    expected: from.map(str::to_string),
                    found: inner.active.clone(),
                });
            }
            let prev = inner.active.replace(to.to_string());
            (member, prev)
        };

        match self.policy.set_preferred(&member.iface) {
            Ok(()) => {
                let mut inner = self.inner.lock().unwrap();
                if let Some(p) = &prev {
                    inner.last_active.insert(p.clone(), Utc::now());
                }
                drop(inner);
                self.stats.inc_switches();
                self.stats.clear_last_error();
                tracing::info!(
                    from = prev.as_deref().unwrap_or("none"),
                    to,
                    backend = self.policy.name(),
                    "switched active member"
                );
                emit(
                    &self.store,
                    self.sink.as_ref(),
                    Event::switch(prev.as_deref(), to, detail),
                );
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                inner.active = prev;
                drop(inner);
                self.stats.set_last_error(
                    uplink_common::models::ErrorKind::Backend,
                    "controller",
                    e.to_string(),
                );
                tracing::warn!(to, backend = self.policy.name(), "switch failed: {e}");
                Err(e.into())
            }
        }
    }
}
