//! # Decision Engine
//!
//! One `tick` per decision interval: score every eligible member from its
//! most recent sample, compare the best challenger against the active
//! member under hysteresis and cooldown, and ask the controller to switch
//! when the challenger has earned it.
//!
//! The engine is a serial actor: the runtime guards it with a try-lock and
//! records a `skipped_tick` instead of queueing a second cycle. It keeps no
//! long-lived controller handle; the controller is passed into each call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use uplink_common::config::{Config, ScoringWeights};
use uplink_common::models::{Event, EventKind, Member, MemberState, Metrics, Score};

use crate::controller::{Controller, ControllerError};
use crate::score::{ewma_step, final_score, instant_score};
use crate::sink::{emit, EventSink};
use crate::stats::RuntimeStats;
use crate::store::TelemetryStore;

/// Final-score band edges for the member health ladder.
const HEALTHY_FLOOR: f64 = 70.0;
const DEGRADED_FLOOR: f64 = 40.0;

/// Decision tuning, refreshed on config reload.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub hysteresis_margin: f64,
    pub cooldown: chrono::Duration,
    pub min_samples: u32,
    pub ewma_alpha: f64,
    pub weights: ScoringWeights,
}

impl From<&Config> for Tuning {
    fn from(cfg: &Config) -> Self {
        Tuning {
            hysteresis_margin: cfg.hysteresis_margin,
            cooldown: chrono::Duration::seconds(cfg.cooldown_seconds as i64),
            min_samples: cfg.min_samples,
            ewma_alpha: cfg.ewma_alpha,
            weights: cfg.weights,
        }
    }
}

/// Per-member scoring and health state.
#[derive(Debug, Default)]
struct MemberTrack {
    ewma: Option<f64>,
    state: MemberState,
    /// Consecutive healthy-band samples while recovering.
    healthy_run: u32,
    /// Successful samples since the member last entered `Unhealthy`.
    samples_since_unhealthy: u32,
    /// Whether the most recent collection produced nothing usable.
    last_failed: bool,
    last_score: Option<Score>,
}

pub struct DecisionEngine {
    tuning: Tuning,
    tracks: HashMap<String, MemberTrack>,
    last_switch_at: Option<DateTime<Utc>>,
    ready: bool,
    store: Arc<TelemetryStore>,
    sink: Arc<dyn EventSink>,
    stats: Arc<RuntimeStats>,
}

impl DecisionEngine {
    pub fn new(
        tuning: Tuning,
        store: Arc<TelemetryStore>,
        sink: Arc<dyn EventSink>,
        stats: Arc<RuntimeStats>,
    ) -> Self {
        DecisionEngine {
            tuning,
            tracks: HashMap::new(),
            last_switch_at: None,
            ready: false,
            store,
            sink,
            stats,
        }
    }

    /// Swap in new tuning (config reload). Scoring state is kept.
    pub fn set_tuning(&mut self, tuning: Tuning) {
        self.tuning = tuning;
    }

    /// Whether at least one cycle has completed.
    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Health state and latest score for a member, for status snapshots.
    pub fn track_view(&self, member: &str) -> (MemberState, Option<Score>) {
        self.tracks
            .get(member)
            .map(|t| (t.state, t.last_score))
            .unwrap_or((MemberState::Unknown, None))
    }

    /// Score a freshly collected sample, update the member's smoothing and
    /// health state, and return the score to be stored with the sample.
    pub fn observe_sample(&mut self, member: &Member, metrics: &Metrics) -> Score {
        let track = self.tracks.entry(member.name.clone()).or_default();

        let instant = match instant_score(member.class, metrics, &self.tuning.weights) {
            Some(i) => {
                track.last_failed = false;
                track.samples_since_unhealthy = track.samples_since_unhealthy.saturating_add(1);
                i
            }
            None => {
                track.last_failed = true;
                self.stats.inc_collector_errors();
                emit(
                    &self.store,
                    self.sink.as_ref(),
                    Event::new(
                        EventKind::CollectorFail,
                        Some(&member.name),
                        "sample carried no scorable fields",
                    ),
                );
                0.0
            }
        };

        let ewma = ewma_step(self.tuning.ewma_alpha, instant, track.ewma);
        track.ewma = Some(ewma);
        let fin = final_score(ewma, member.weight);

        Self::advance_state(track, fin, self.tuning.min_samples);

        let score = Score {
            instant,
            ewma,
            final_score: fin,
        };
        track.last_score = Some(score);
        score
    }

    /// Record a collection that produced nothing (error or missed
    /// deadline). The member keeps its last score but cannot win a switch
    /// until it samples cleanly again.
    pub fn observe_failure(&mut self, member: &str, kind: EventKind, detail: &str) {
        let track = self.tracks.entry(member.to_string()).or_default();
        track.last_failed = true;
        self.stats.inc_collector_errors();
        emit(
            &self.store,
            self.sink.as_ref(),
            Event::new(kind, Some(member), detail),
        );
    }

    /// One decision cycle.
    pub fn tick(&mut self, controller: &Controller, now: DateTime<Utc>) {
        self.stats.inc_decision_cycles();
        let members = controller.members();
        self.tracks.retain(|name, _| members.iter().any(|m| &m.name == name));

        if members.is_empty() {
            self.ready = true;
            return;
        }

        let active = controller.active_name();
        let best = self.best_candidate(&members);

        if let Some((best, best_score)) = best {
            match active.as_deref() {
                None => self.adopt(controller, &best, best_score, now),
                Some(active_name) if active_name == best.name => {}
                Some(active_name) => {
                    self.challenge(controller, active_name, &best, best_score, now)
                }
            }
        }

        self.ready = true;
    }

    /// Operator-forced switch: bypasses hysteresis, cooldown, and the
    /// minimum-sample requirement, but still refuses a target whose most
    /// recent collection failed.
    pub fn force_switch(
        &mut self,
        controller: &Controller,
        to: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ControllerError> {
        if controller.member(to).is_none() {
            return Err(ControllerError::UnknownMember(to.to_string()));
        }
        // A known member with no track has never collected successfully.
        match self.tracks.get(to) {
            Some(track) if !track.last_failed => {}
            _ => return Err(ControllerError::LastCollectionFailed(to.to_string())),
        }
        let active = controller.active_name();
        if active.as_deref() == Some(to) {
            return Ok(());
        }
        controller.switch(active.as_deref(), to, "operator force")?;
        self.last_switch_at = Some(now);
        Ok(())
    }

    // ─── Internal ───────────────────────────────────────────────────────

    /// Highest-scoring eligible member. Ties break on static weight, then
    /// lexicographic name. Members still in `Recovering` are not eligible.
    fn best_candidate(&self, members: &[Member]) -> Option<(Member, Score)> {
        let mut best: Option<(&Member, Score)> = None;
        for m in members {
            if !m.eligible {
                continue;
            }
            let Some(track) = self.tracks.get(&m.name) else {
                continue;
            };
            if track.state == MemberState::Recovering {
                continue;
            }
            let Some(score) = track.last_score else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((cur, cur_score)) => {
                    let a = (score.final_score, m.weight);
                    let b = (cur_score.final_score, cur.weight);
                    a > b || (a == b && m.name < cur.name)
                }
            };
            if better {
                best = Some((m, score));
            }
        }
        best.map(|(m, s)| (m.clone(), s))
    }

    /// No member is active: adopt the best candidate straight away so the
    /// daemon converges within one cycle after startup.
    fn adopt(&mut self, controller: &Controller, best: &Member, score: Score, now: DateTime<Utc>) {
        if self.tracks.get(&best.name).is_some_and(|t| t.last_failed) {
            return;
        }
        let detail = format!("bootstrap adoption, final {:.1}", score.final_score);
        match controller.switch(None, &best.name, &detail) {
            Ok(()) => self.last_switch_at = Some(now),
            Err(e) => tracing::warn!(member = %best.name, "bootstrap switch failed: {e}"),
        }
    }

    fn challenge(
        &mut self,
        controller: &Controller,
        active_name: &str,
        best: &Member,
        best_score: Score,
        now: DateTime<Utc>,
    ) {
        let active_final = self
            .tracks
            .get(active_name)
            .and_then(|t| t.last_score)
            .map(|s| s.final_score)
            .unwrap_or(0.0);
        let delta = best_score.final_score - active_final;

        if delta < self.tuning.hysteresis_margin {
            // Only an actual improvement that falls short of the margin is
            // a rejection worth recording.
            if delta > 0.0 {
                emit(
                    &self.store,
                    self.sink.as_ref(),
                    Event::new(
                        EventKind::RejectHysteresis,
                        Some(&best.name),
                        format!(
                            "candidate {:.1} vs active {active_name} {:.1}, margin {:.1}",
                            best_score.final_score, active_final, self.tuning.hysteresis_margin
                        ),
                    ),
                );
            }
            return;
        }

        if let Some(last) = self.last_switch_at {
            let since = now - last;
            if since < self.tuning.cooldown {
                emit(
                    &self.store,
                    self.sink.as_ref(),
                    Event::new(
                        EventKind::RejectCooldown,
                        Some(&best.name),
                        format!(
                            "last switch {}s ago, cooldown {}s",
                            since.num_seconds(),
                            self.tuning.cooldown.num_seconds()
                        ),
                    ),
                );
                return;
            }
        }

        let track = &self.tracks[&best.name];
        if track.samples_since_unhealthy < self.tuning.min_samples {
            tracing::debug!(
                member = %best.name,
                samples = track.samples_since_unhealthy,
                "challenger lacks samples since last unhealthy mark"
            );
            return;
        }
        if track.last_failed {
            tracing::debug!(member = %best.name, "challenger's last collection failed");
            return;
        }

        let detail = format!(
            "final {:.1} beats {active_name} {:.1} by {delta:.1}",
            best_score.final_score, active_final
        );
        match controller.switch(Some(active_name), &best.name, &detail) {
            Ok(()) => self.last_switch_at = Some(now),
            Err(e) => tracing::warn!(to = %best.name, "switch failed: {e}"),
        }
    }

    /// Health-state ladder:
    ///
    /// ```text
    /// Unknown → Healthy ⇄ Degraded → Unhealthy → Recovering → Healthy
    /// ```
    fn advance_state(track: &mut MemberTrack, fin: f64, min_samples: u32) {
        let band = if fin >= HEALTHY_FLOOR {
            MemberState::Healthy
        } else if fin >= DEGRADED_FLOOR {
            MemberState::Degraded
        } else {
            MemberState::Unhealthy
        };

        track.state = match track.state {
            MemberState::Unknown => {
                if band == MemberState::Unhealthy {
                    track.samples_since_unhealthy = 0;
                }
                band
            }
            MemberState::Healthy | MemberState::Degraded => {
                if band == MemberState::Unhealthy {
                    track.samples_since_unhealthy = 0;
                }
                band
            }
            MemberState::Unhealthy => {
                if band == MemberState::Healthy {
                    track.healthy_run = 1;
                    if track.healthy_run >= min_samples {
                        MemberState::Healthy
                    } else {
                        MemberState::Recovering
                    }
                } else {
                    MemberState::Unhealthy
                }
            }
            MemberState::Recovering => match band {
                MemberState::Healthy => {
                    track.healthy_run += 1;
                    if track.healthy_run >= min_samples {
                        MemberState::Healthy
                    } else {
                        MemberState::Recovering
                    }
                }
                MemberState::Unhealthy => {
                    track.healthy_run = 0;
                    track.samples_since_unhealthy = 0;
                    MemberState::Unhealthy
                }
                _ => {
                    track.healthy_run = 0;
                    MemberState::Recovering
                }
            },
        };
    }
}
