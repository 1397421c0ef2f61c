//! # Member Discovery
//!
//! Enumerates candidate uplinks from the network stack, classifies them by
//! interface name, and reconciles the controller's member set. A member
//! must be absent from two consecutive scans before it is removed, and a
//! recently-active member is additionally retained for the configured
//! grace period, so transient backend hiccups never tear down live state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use uplink_common::config::Config;
use uplink_common::models::{Event, EventKind, Member, MemberClass};

use crate::controller::Controller;
use crate::sink::{emit, EventSink};
use crate::store::TelemetryStore;

/// One interface as seen by the link source.
#[derive(Debug, Clone)]
pub struct RawLink {
    pub name: String,
    pub oper_up: bool,
}

/// Where candidate interfaces come from.
pub trait LinkSource: Send + Sync {
    fn scan(&self) -> Vec<RawLink>;
}

// ── Sysfs source ────────────────────────────────────────────────────

/// Enumerates interfaces from `/sys/class/net`.
pub struct SysfsSource {
    root: PathBuf,
}

impl SysfsSource {
    pub fn new() -> Self {
        Self::with_root("/sys/class/net")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        SysfsSource { root: root.into() }
    }
}

impl Default for SysfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSource for SysfsSource {
    fn scan(&self) -> Vec<RawLink> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            tracing::warn!(root = %self.root.display(), "cannot read interface directory");
            return Vec::new();
        };

        let mut links = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let operstate = std::fs::read_to_string(self.root.join(&name).join("operstate"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            // "unknown" covers point-to-point devices that never assert
            // a carrier (wwan, tunnels).
            let oper_up = matches!(operstate.as_str(), "up" | "unknown");
            links.push(RawLink { name, oper_up });
        }
        links.sort_by(|a, b| a.name.cmp(&b.name));
        links
    }
}

// ── Simulated source ────────────────────────────────────────────────

/// Fixed synthetic member set for `--simulate` runs on dev machines.
pub struct SimulatedSource;

impl LinkSource for SimulatedSource {
    fn scan(&self) -> Vec<RawLink> {
        ["starlink", "mob1s1a1", "wlan0"]
            .into_iter()
            .map(|name| RawLink {
                name: name.to_string(),
                oper_up: true,
            })
            .collect()
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Built-in interface-name prefix table, consulted after the configured
/// overrides.
const PREFIX_TABLE: &[(&str, MemberClass)] = &[
    ("starlink", MemberClass::Starlink),
    ("wwan", MemberClass::Cellular),
    ("mob", MemberClass::Cellular),
    ("lte", MemberClass::Cellular),
    ("qmi", MemberClass::Cellular),
    ("ppp", MemberClass::Cellular),
    ("wlan", MemberClass::Wifi),
    ("wifi", MemberClass::Wifi),
    ("ath", MemberClass::Wifi),
    ("eth", MemberClass::Lan),
    ("lan", MemberClass::Lan),
    ("br-", MemberClass::Lan),
    ("wan", MemberClass::Lan),
];

/// Classify an interface name: configured overrides first, then the
/// built-in prefix table, `other` as the catch-all.
pub fn classify(name: &str, overrides: &HashMap<String, MemberClass>) -> MemberClass {
    for (prefix, class) in overrides {
        if name.starts_with(prefix.as_str()) {
            return *class;
        }
    }
    for (prefix, class) in PREFIX_TABLE {
        if name.starts_with(prefix) {
            return *class;
        }
    }
    MemberClass::Other
}

/// Default static weight per class; doubles as the preference order when
/// scores tie.
pub fn default_weight(class: MemberClass) -> u32 {
    match class {
        MemberClass::Starlink => 100,
        MemberClass::Cellular => 80,
        MemberClass::Wifi => 60,
        MemberClass::Lan => 40,
        MemberClass::Other => 20,
    }
}

// ── Discovery ───────────────────────────────────────────────────────

pub struct Discovery {
    source: Box<dyn LinkSource>,
    class_overrides: HashMap<String, MemberClass>,
    exclude_prefixes: Vec<String>,
    grace: chrono::Duration,
    /// Consecutive scans each known member has been absent from.
    miss_counts: HashMap<String, u32>,
    store: Arc<TelemetryStore>,
    sink: Arc<dyn EventSink>,
}

impl Discovery {
    pub fn new(
        source: Box<dyn LinkSource>,
        cfg: &Config,
        store: Arc<TelemetryStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Discovery {
            source,
            class_overrides: cfg.class_overrides.clone(),
            exclude_prefixes: cfg.exclude_interfaces.clone(),
            grace: chrono::Duration::seconds(cfg.member_grace_seconds as i64),
            miss_counts: HashMap::new(),
            store,
            sink,
        }
    }

    /// Apply reloaded configuration. Miss counts survive the reload.
    pub fn apply_config(&mut self, cfg: &Config) {
        self.class_overrides = cfg.class_overrides.clone();
        self.exclude_prefixes = cfg.exclude_interfaces.clone();
        self.grace = chrono::Duration::seconds(cfg.member_grace_seconds as i64);
    }

    fn excluded(&self, name: &str) -> bool {
        self.exclude_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// One discovery sweep: scan, classify, reconcile the controller's
    /// member set. Returns the resulting member count.
    pub fn refresh(&mut self, controller: &Controller, now: DateTime<Utc>) -> usize {
        let scanned: Vec<RawLink> = self
            .source
            .scan()
            .into_iter()
            .filter(|l| !self.excluded(&l.name))
            .collect();
        let scanned_names: HashSet<&str> = scanned.iter().map(|l| l.name.as_str()).collect();
        let known = controller.members();

        let mut members: Vec<Member> = Vec::with_capacity(scanned.len());
        for link in &scanned {
            self.miss_counts.remove(&link.name);
            let existing = known.iter().find(|m| m.name == link.name);
            if existing.is_none() {
                let class = classify(&link.name, &self.class_overrides);
                tracing::info!(member = %link.name, class = %class, "discovered member");
                emit(
                    &self.store,
                    self.sink.as_ref(),
                    Event::new(
                        EventKind::MemberAdded,
                        Some(&link.name),
                        format!("class {class}"),
                    ),
                );
            }
            let mut member = match existing {
                Some(m) => m.clone(),
                None => {
                    let class = classify(&link.name, &self.class_overrides);
                    Member::new(link.name.clone(), link.name.clone(), class)
                        .with_weight(default_weight(class))
                }
            };
            member.last_seen_at = now;
            members.push(member);
        }

        for missing in known.iter().filter(|m| !scanned_names.contains(m.name.as_str())) {
            let misses = self.miss_counts.entry(missing.name.clone()).or_insert(0);
            *misses += 1;
            let retain = *misses < 2 || controller.was_active_within(&missing.name, self.grace, now);
            if retain {
                tracing::debug!(member = %missing.name, misses = *misses, "member absent from scan, retaining");
                members.push(missing.clone());
            } else {
                tracing::info!(member = %missing.name, "member removed");
                self.miss_counts.remove(&missing.name);
                emit(
                    &self.store,
                    self.sink.as_ref(),
                    Event::new(
                        EventKind::MemberRemoved,
                        Some(&missing.name),
                        "absent from two consecutive scans",
                    ),
                );
            }
        }

        controller.set_members(members);
        controller.members().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{RouteError, RoutePolicy};
    use crate::sink::LogSink;
    use crate::stats::RuntimeStats;
    use crate::store::StoreLimits;
    use std::sync::Mutex;

    struct OkPolicy;
    impl RoutePolicy for OkPolicy {
        fn name(&self) -> &'static str {
            "ok"
        }
        fn set_preferred(&self, _: &str) -> Result<(), RouteError> {
            Ok(())
        }
    }

    /// Scan results controlled by the test.
    struct ScriptedSource {
        links: Mutex<Vec<RawLink>>,
    }

    impl ScriptedSource {
        fn new(names: &[&str]) -> Self {
            ScriptedSource {
                links: Mutex::new(
                    names
                        .iter()
                        .map(|n| RawLink {
                            name: n.to_string(),
                            oper_up: true,
                        })
                        .collect(),
                ),
            }
        }
    }

    impl LinkSource for ScriptedSource {
        fn scan(&self) -> Vec<RawLink> {
            self.links.lock().unwrap().clone()
        }
    }

    fn harness(names: &[&str]) -> (Discovery, Controller, Arc<ScriptedSource>) {
        struct Fwd(Arc<ScriptedSource>);
        impl LinkSource for Fwd {
            fn scan(&self) -> Vec<RawLink> {
                self.0.scan()
            }
        }

        let store = Arc::new(TelemetryStore::new(StoreLimits::default()));
        let sink: Arc<dyn EventSink> = Arc::new(LogSink);
        let stats = Arc::new(RuntimeStats::new());
        let controller = Controller::new(Box::new(OkPolicy), store.clone(), sink.clone(), stats);
        let source = Arc::new(ScriptedSource::new(names));
        let discovery = Discovery::new(
            Box::new(Fwd(source.clone())),
            &Config::default(),
            store,
            sink,
        );
        (discovery, controller, source)
    }

    // ─── Classification ─────────────────────────────────────────────────

    #[test]
    fn builtin_prefixes_classify() {
        let none = HashMap::new();
        assert_eq!(classify("mob1s1a1", &none), MemberClass::Cellular);
        assert_eq!(classify("wwan0", &none), MemberClass::Cellular);
        assert_eq!(classify("wlan0", &none), MemberClass::Wifi);
        assert_eq!(classify("eth0", &none), MemberClass::Lan);
        assert_eq!(classify("br-lan", &none), MemberClass::Lan);
        assert_eq!(classify("starlink0", &none), MemberClass::Starlink);
        assert_eq!(classify("gretap3", &none), MemberClass::Other);
    }

    #[test]
    fn overrides_beat_builtin_table() {
        let mut overrides = HashMap::new();
        overrides.insert("wan".to_string(), MemberClass::Starlink);
        assert_eq!(classify("wan", &overrides), MemberClass::Starlink);
        assert_eq!(classify("wan6", &overrides), MemberClass::Starlink);
    }

    #[test]
    fn class_weights_order_preference() {
        assert!(default_weight(MemberClass::Starlink) > default_weight(MemberClass::Cellular));
        assert!(default_weight(MemberClass::Cellular) > default_weight(MemberClass::Wifi));
        assert!(default_weight(MemberClass::Wifi) > default_weight(MemberClass::Lan));
        assert!(default_weight(MemberClass::Lan) > default_weight(MemberClass::Other));
    }

    // ─── Reconciliation ─────────────────────────────────────────────────

    #[test]
    fn refresh_populates_members() {
        let (mut discovery, controller, _) = harness(&["eth0", "mob1s1a1", "wlan0"]);
        let count = discovery.refresh(&controller, Utc::now());
        assert_eq!(count, 3);
        let m = controller.member("mob1s1a1").unwrap();
        assert_eq!(m.class, MemberClass::Cellular);
        assert_eq!(m.weight, 80);
        assert!(m.eligible);
    }

    #[test]
    fn excluded_prefixes_never_become_members() {
        let (mut discovery, controller, _) =
            harness(&["lo", "docker0", "veth12ab", "eth0"]);
        discovery.refresh(&controller, Utc::now());
        let names: Vec<String> = controller.members().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["eth0".to_string()]);
    }

    #[test]
    fn one_missed_scan_retains_member() {
        let (mut discovery, controller, source) = harness(&["eth0", "wlan0"]);
        discovery.refresh(&controller, Utc::now());
        assert_eq!(controller.members().len(), 2);

        source.links.lock().unwrap().retain(|l| l.name != "wlan0");
        discovery.refresh(&controller, Utc::now());
        assert!(
            controller.member("wlan0").is_some(),
            "a single miss must ride through"
        );
    }

    #[test]
    fn two_missed_scans_remove_member() {
        let (mut discovery, controller, source) = harness(&["eth0", "wlan0"]);
        discovery.refresh(&controller, Utc::now());

        source.links.lock().unwrap().retain(|l| l.name != "wlan0");
        discovery.refresh(&controller, Utc::now());
        discovery.refresh(&controller, Utc::now());
        assert!(controller.member("wlan0").is_none());
        assert_eq!(controller.members().len(), 1);
    }

    #[test]
    fn reappearing_member_resets_miss_count() {
        let (mut discovery, controller, source) = harness(&["eth0", "wlan0"]);
        discovery.refresh(&controller, Utc::now());

        source.links.lock().unwrap().retain(|l| l.name != "wlan0");
        discovery.refresh(&controller, Utc::now());

        source.links.lock().unwrap().push(RawLink {
            name: "wlan0".into(),
            oper_up: true,
        });
        discovery.refresh(&controller, Utc::now());

        source.links.lock().unwrap().retain(|l| l.name != "wlan0");
        discovery.refresh(&controller, Utc::now());
        assert!(
            controller.member("wlan0").is_some(),
            "miss count must reset when the member reappears"
        );
    }

    #[test]
    fn active_member_survives_removal_for_grace_period() {
        let (mut discovery, controller, source) = harness(&["eth0", "wlan0"]);
        let t0 = Utc::now();
        discovery.refresh(&controller, t0);
        controller.switch(None, "wlan0", "test").unwrap();

        source.links.lock().unwrap().retain(|l| l.name != "wlan0");
        discovery.refresh(&controller, t0);
        discovery.refresh(&controller, t0);
        discovery.refresh(&controller, t0);
        assert!(
            controller.member("wlan0").is_some(),
            "active member is retained past two misses"
        );

        // Hand the active role to eth0; once the grace period has passed
        // the vanished member can finally be dropped.
        controller.switch(Some("wlan0"), "eth0", "test").unwrap();
        let later = t0 + chrono::Duration::seconds(600);
        discovery.refresh(&controller, later);
        assert!(controller.member("wlan0").is_none());
    }

    #[test]
    fn member_events_emitted() {
        let (mut discovery, controller, source) = harness(&["eth0"]);
        let store = discovery.store.clone();
        let before = Utc::now();
        discovery.refresh(&controller, Utc::now());
        source.links.lock().unwrap().clear();
        discovery.refresh(&controller, Utc::now());
        discovery.refresh(&controller, Utc::now());

        let events = store.events_since(before, 50);
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::MemberAdded && e.member.as_deref() == Some("eth0")));
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::MemberRemoved && e.member.as_deref() == Some("eth0")));
    }

    // ─── Simulated Source ───────────────────────────────────────────────

    #[test]
    fn simulated_source_yields_three_classes() {
        let links = SimulatedSource.scan();
        let none = HashMap::new();
        let classes: Vec<MemberClass> =
            links.iter().map(|l| classify(&l.name, &none)).collect();
        assert!(classes.contains(&MemberClass::Starlink));
        assert!(classes.contains(&MemberClass::Cellular));
        assert!(classes.contains(&MemberClass::Wifi));
    }
}
