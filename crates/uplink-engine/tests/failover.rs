//! End-to-end failover scenarios: a full engine assembly with a recording
//! route backend and directly injected samples.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use uplink_common::config::Config;
use uplink_common::models::{
    CollectionMethod, Event, EventKind, Member, MemberClass, MemberState, Metrics,
};
use uplink_engine::controller::Controller;
use uplink_engine::decision::{DecisionEngine, Tuning};
use uplink_engine::route::{RouteError, RoutePolicy};
use uplink_engine::sink::{EventSink, LogSink};
use uplink_engine::stats::RuntimeStats;
use uplink_engine::store::{StoreLimits, TelemetryStore, SAMPLE_COST_BYTES};

// ── Harness ─────────────────────────────────────────────────────────

struct RecordingPolicy {
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RoutePolicy for RecordingPolicy {
    fn name(&self) -> &'static str {
        "recording"
    }
    fn set_preferred(&self, iface: &str) -> Result<(), RouteError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RouteError::Failed {
                cmd: "mock".into(),
                status: 1,
                stderr: "injected".into(),
            });
        }
        self.calls.lock().unwrap().push(iface.to_string());
        Ok(())
    }
}

struct Harness {
    engine: DecisionEngine,
    controller: Controller,
    store: Arc<TelemetryStore>,
    policy: Arc<RecordingPolicy>,
    now: DateTime<Utc>,
    t0: DateTime<Utc>,
}

impl Harness {
    fn new(tuning: Tuning) -> Self {
        Self::with_limits(tuning, StoreLimits::default())
    }

    fn with_limits(tuning: Tuning, limits: StoreLimits) -> Self {
        struct Fwd(Arc<RecordingPolicy>);
        impl RoutePolicy for Fwd {
            fn name(&self) -> &'static str {
                self.0.name()
            }
            fn set_preferred(&self, iface: &str) -> Result<(), RouteError> {
                self.0.set_preferred(iface)
            }
        }

        let policy = Arc::new(RecordingPolicy {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        });
        let store = Arc::new(TelemetryStore::new(limits));
        let sink: Arc<dyn EventSink> = Arc::new(LogSink);
        let stats = Arc::new(RuntimeStats::new());
        let controller = Controller::new(
            Box::new(Fwd(policy.clone())),
            store.clone(),
            sink.clone(),
            stats.clone(),
        );
        let engine = DecisionEngine::new(tuning, store.clone(), sink, stats);
        let now = Utc::now();
        Harness {
            engine,
            controller,
            store,
            policy,
            now,
            t0: now,
        }
    }

    /// Feed one sample per member, store it, and run a decision cycle,
    /// advancing the clock by one minute.
    fn cycle(&mut self, samples: &[(&Member, Metrics)]) {
        for (member, metrics) in samples {
            let mut metrics = metrics.clone();
            metrics.ts = self.now;
            let score = self.engine.observe_sample(member, &metrics);
            self.store.add_sample(&member.name, metrics, score);
        }
        self.engine.tick(&self.controller, self.now);
        self.now += chrono::Duration::seconds(60);
    }

    fn switch_events(&self) -> Vec<Event> {
        self.store
            .events_since(self.t0 - chrono::Duration::hours(1), 10_000)
            .into_iter()
            .filter(|e| e.kind == EventKind::Switch)
            .collect()
    }

    fn final_of(&self, member: &str) -> f64 {
        self.engine
            .track_view(member)
            .1
            .map(|s| s.final_score)
            .unwrap_or(0.0)
    }
}

fn tuning() -> Tuning {
    Tuning::from(&Config::default())
}

fn starlink_member() -> Member {
    Member::new("starlink", "eth1", MemberClass::Starlink).with_weight(100)
}

fn cellular_member() -> Member {
    Member::new("cellular", "wwan0", MemberClass::Cellular).with_weight(80)
}

fn starlink_good() -> Metrics {
    let mut m = Metrics::empty(CollectionMethod::NativeApi);
    m.latency_ms = Some(40.0);
    m.loss_pct = Some(0.0);
    m.jitter_ms = Some(5.0);
    m.signal_dbm = Some(-70.0);
    m.obstruction_pct = Some(0.0);
    m
}

fn starlink_degraded() -> Metrics {
    let mut m = Metrics::empty(CollectionMethod::NativeApi);
    m.latency_ms = Some(400.0);
    m.loss_pct = Some(8.0);
    m.obstruction_pct = Some(15.0);
    m
}

fn cellular_nominal() -> Metrics {
    let mut m = Metrics::empty(CollectionMethod::NativeApi);
    m.latency_ms = Some(120.0);
    m.loss_pct = Some(2.0);
    m.signal_dbm = Some(-95.0);
    m
}

// ── Scenario 1: two members, clear winner ───────────────────────────

#[test]
fn clear_winner_becomes_active_after_first_tick() {
    let mut h = Harness::new(tuning());
    let starlink = starlink_member();
    let cellular = cellular_member();
    h.controller
        .set_members(vec![starlink.clone(), cellular.clone()]);

    h.cycle(&[
        (&starlink, starlink_good()),
        (&cellular, cellular_nominal()),
    ]);

    assert_eq!(h.controller.active_name().as_deref(), Some("starlink"));

    let f_starlink = h.final_of("starlink");
    let f_cellular = h.final_of("cellular");
    assert!(
        f_starlink > 85.0,
        "excellent starlink should score high, got {f_starlink}"
    );
    assert!(
        (45.0..80.0).contains(&f_cellular),
        "nominal cellular lands mid-band, got {f_cellular}"
    );
    assert!(f_starlink - f_cellular >= 10.0);

    // The backend saw exactly the starlink interface.
    assert_eq!(h.policy.calls.lock().unwrap().as_slice(), ["eth1"]);
}

// ── Scenario 2: degradation triggers switch ─────────────────────────

#[test]
fn degradation_switches_to_cellular_exactly_once() {
    let mut h = Harness::new(tuning());
    let starlink = starlink_member();
    let cellular = cellular_member();
    h.controller
        .set_members(vec![starlink.clone(), cellular.clone()]);

    h.cycle(&[
        (&starlink, starlink_good()),
        (&cellular, cellular_nominal()),
    ]);
    assert_eq!(h.controller.active_name().as_deref(), Some("starlink"));

    // Obstructed, lossy dish for min_samples cycles; EWMA bleeds the
    // score down until cellular clears the margin.
    for _ in 0..4 {
        h.cycle(&[
            (&starlink, starlink_degraded()),
            (&cellular, cellular_nominal()),
        ]);
    }

    assert_eq!(h.controller.active_name().as_deref(), Some("cellular"));

    let switches = h.switch_events();
    let failovers: Vec<&Event> = switches.iter().filter(|e| e.from.is_some()).collect();
    assert_eq!(failovers.len(), 1, "exactly one failover switch");
    assert_eq!(failovers[0].from.as_deref(), Some("starlink"));
    assert_eq!(failovers[0].to.as_deref(), Some("cellular"));
}

// ── Scenario 3: hysteresis prevents flap ────────────────────────────

#[test]
fn partial_recovery_inside_margin_does_not_flap() {
    let mut h = Harness::new(tuning());
    let starlink = starlink_member();
    let cellular = cellular_member();
    h.controller
        .set_members(vec![starlink.clone(), cellular.clone()]);

    h.cycle(&[
        (&starlink, starlink_good()),
        (&cellular, cellular_nominal()),
    ]);
    for _ in 0..4 {
        h.cycle(&[
            (&starlink, starlink_degraded()),
            (&cellular, cellular_nominal()),
        ]);
    }
    assert_eq!(h.controller.active_name().as_deref(), Some("cellular"));

    // Starlink recovers only part way: its final converges a few points
    // above cellular's, inside the 10-point margin.
    let mut partial = Metrics::empty(CollectionMethod::NativeApi);
    partial.latency_ms = Some(180.0);
    partial.loss_pct = Some(1.5);
    partial.obstruction_pct = Some(10.0);

    let before = h.now;
    for _ in 0..15 {
        h.cycle(&[(&starlink, partial.clone()), (&cellular, cellular_nominal())]);
    }

    assert_eq!(
        h.controller.active_name().as_deref(),
        Some("cellular"),
        "no switch inside the hysteresis margin"
    );
    let f_starlink = h.final_of("starlink");
    let f_cellular = h.final_of("cellular");
    assert!(
        f_starlink > f_cellular && f_starlink - f_cellular < 10.0,
        "recovery must land inside the margin: starlink {f_starlink}, cellular {f_cellular}"
    );
    let events = h.store.events_since(before, 1000);
    assert!(
        events.iter().any(|e| e.kind == EventKind::RejectHysteresis),
        "reject_hysteresis event must be present"
    );
}

// ── Scenario 4: cooldown prevents rapid switch ──────────────────────

#[test]
fn cooldown_rejects_back_to_back_switches() {
    let mut t = tuning();
    t.cooldown = chrono::Duration::seconds(300);
    t.min_samples = 1;
    let mut h = Harness::new(t);
    let a = Member::new("a", "eth0", MemberClass::Lan);
    let b = Member::new("b", "eth1", MemberClass::Lan);
    h.controller.set_members(vec![a.clone(), b.clone()]);

    let mut strong = Metrics::empty(CollectionMethod::FallbackPing);
    strong.latency_ms = Some(20.0);
    let mut weak = Metrics::empty(CollectionMethod::FallbackPing);
    weak.latency_ms = Some(500.0);

    // First winner adopted at t0.
    h.cycle(&[(&a, strong.clone()), (&b, weak.clone())]);
    assert_eq!(h.controller.active_name().as_deref(), Some("a"));

    // The fortunes invert immediately; the second switch must wait out
    // the cooldown. Cycles advance one minute each, so four cycles stay
    // inside the 300 s window.
    let before = h.now;
    for _ in 0..4 {
        h.cycle(&[(&a, weak.clone()), (&b, strong.clone())]);
    }
    assert_eq!(h.controller.active_name().as_deref(), Some("a"));
    let events = h.store.events_since(before, 1000);
    assert!(
        events.iter().any(|e| e.kind == EventKind::RejectCooldown),
        "reject_cooldown event must be present"
    );

    // Past the cooldown the switch lands.
    h.cycle(&[(&a, weak.clone()), (&b, strong.clone())]);
    assert_eq!(h.controller.active_name().as_deref(), Some("b"));

    // No two switch events closer than the cooldown.
    let switches = h.switch_events();
    for pair in switches.windows(2) {
        let gap = (pair[0].ts - pair[1].ts).num_seconds().abs();
        assert!(
            gap >= 300 || pair[0].from.is_none() || pair[1].from.is_none(),
            "switches {gap}s apart violate the cooldown"
        );
    }
}

// ── Scenario 5: collector partial success ───────────────────────────

#[test]
fn partial_metrics_score_with_reweighted_fields() {
    let mut h = Harness::new(tuning());
    let starlink = starlink_member();
    h.controller.set_members(vec![starlink.clone()]);

    // Dish API unreachable, ping answered: latency and loss only.
    let mut partial = Metrics::empty(CollectionMethod::FallbackPing);
    partial.latency_ms = Some(40.0);
    partial.loss_pct = Some(0.0);

    h.cycle(&[(&starlink, partial)]);

    let sample = h.store.latest_sample("starlink").unwrap();
    assert_eq!(sample.metrics.method, CollectionMethod::FallbackPing);
    assert!(!sample.metrics.api_accessible);
    assert!(sample.metrics.signal_dbm.is_none());
    assert!(sample.metrics.obstruction_pct.is_none());

    // Latency and loss weights carry the whole score.
    assert!(
        sample.score.final_score > 85.0,
        "reweighted partial sample should still score high, got {}",
        sample.score.final_score
    );
    assert_eq!(h.engine.track_view("starlink").0, MemberState::Healthy);
    assert_eq!(h.controller.active_name().as_deref(), Some("starlink"));
}

// ── Scenario 6: store eviction under a 1 MB cap ─────────────────────

#[test]
fn store_eviction_keeps_newest_suffix() {
    let limits = StoreLimits {
        retention: chrono::Duration::hours(24),
        max_bytes: 1024 * 1024,
    };
    let mut h = Harness::with_limits(tuning(), limits);
    let starlink = starlink_member();
    let cellular = cellular_member();
    h.controller
        .set_members(vec![starlink.clone(), cellular.clone()]);

    let t_start = h.now;
    // Push well past 1 MB of samples across both members.
    let per_member = (limits.max_bytes / SAMPLE_COST_BYTES) as i64;
    for i in 0..per_member {
        let ts = t_start + chrono::Duration::milliseconds(i * 10);
        for member in [&starlink, &cellular] {
            let mut m = starlink_good();
            m.ts = ts;
            let score = h.engine.observe_sample(member, &m);
            h.store.add_sample(&member.name, m, score);
        }
    }

    assert!(
        h.store.memory_bytes() <= limits.max_bytes,
        "store must stay under its cap"
    );
    for name in ["starlink", "cellular"] {
        let samples = h.store.samples_since(name, t_start);
        assert!(!samples.is_empty(), "{name} must retain a newest suffix");
        let newest = samples.last().unwrap().ts();
        assert_eq!(
            newest,
            t_start + chrono::Duration::milliseconds((per_member - 1) * 10),
            "{name} must keep its newest sample"
        );
        assert!(
            samples.first().unwrap().ts() > t_start,
            "{name}'s oldest samples must be evicted first"
        );
    }
}

// ── Boundary: equal-bad members never switch ────────────────────────

#[test]
fn all_zero_scores_hold_the_active_member() {
    let mut h = Harness::new(tuning());
    let a = Member::new("a", "eth0", MemberClass::Lan);
    let b = Member::new("b", "eth1", MemberClass::Lan);
    h.controller.set_members(vec![a.clone(), b.clone()]);

    let mut dead = Metrics::empty(CollectionMethod::FallbackPing);
    dead.latency_ms = Some(500.0);
    dead.loss_pct = Some(100.0);

    h.cycle(&[(&a, dead.clone()), (&b, dead.clone())]);
    let adopted = h.controller.active_name();
    assert!(adopted.is_some(), "bootstrap still adopts a member");

    for _ in 0..5 {
        h.cycle(&[(&a, dead.clone()), (&b, dead.clone())]);
    }
    assert_eq!(
        h.controller.active_name(),
        adopted,
        "equal-bad members must not flap"
    );
    assert_eq!(
        h.switch_events()
            .iter()
            .filter(|e| e.from.is_some())
            .count(),
        0
    );
}

// ── Invariant: backend failure leaves state intact ──────────────────

#[test]
fn backend_failure_keeps_previous_active() {
    let mut t = tuning();
    t.cooldown = chrono::Duration::zero();
    t.min_samples = 1;
    let mut h = Harness::new(t);
    let a = Member::new("a", "eth0", MemberClass::Lan);
    let b = Member::new("b", "eth1", MemberClass::Lan);
    h.controller.set_members(vec![a.clone(), b.clone()]);

    let mut strong = Metrics::empty(CollectionMethod::FallbackPing);
    strong.latency_ms = Some(20.0);
    let mut weak = Metrics::empty(CollectionMethod::FallbackPing);
    weak.latency_ms = Some(500.0);

    h.cycle(&[(&a, strong.clone()), (&b, weak.clone())]);
    assert_eq!(h.controller.active_name().as_deref(), Some("a"));

    h.policy.fail.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        h.cycle(&[(&a, weak.clone()), (&b, strong.clone())]);
    }
    assert_eq!(
        h.controller.active_name().as_deref(),
        Some("a"),
        "failed backend calls must not move the pointer"
    );

    // Backend recovers; the pending decision is retried on the next tick.
    h.policy.fail.store(false, Ordering::SeqCst);
    h.cycle(&[(&a, weak), (&b, strong)]);
    assert_eq!(h.controller.active_name().as_deref(), Some("b"));
}
