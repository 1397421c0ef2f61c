//! Runtime tickers.
//!
//! Three independent loops on fixed periods — discovery, collection,
//! decision — plus the shutdown plumbing. Collection fans out one task per
//! member per cycle with a deadline of half the tick; the decision loop is
//! a serial actor that skips (never queues) an overlapping cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use uplink_common::config::Config;
use uplink_common::models::{Event, EventKind, Member, MemberClass};
use uplink_engine::collect::{
    collector_for, simulated_collector, CollectError, CollectorSettings, MemberCollector,
};
use uplink_engine::sink::{emit, EventSink};

use crate::state::AppState;

/// Discovery sweep loop. Discovery emits its own membership events through
/// the handles it was built with.
pub async fn discovery_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    loop {
        {
            let mut discovery = state.discovery().lock().await;
            let count = discovery.refresh(state.controller(), Utc::now());
            tracing::debug!(members = count, "discovery sweep complete");
        }

        let interval = state.config().discovery_interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Collection fan-out loop: one worker per member per cycle.
pub async fn collection_loop(
    state: AppState,
    sink: Arc<dyn EventSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Collectors are cached per member and rebuilt when the member's class
    // or the config generation changes.
    let mut collectors: HashMap<String, (MemberClass, Arc<MemberCollector>)> = HashMap::new();
    let mut config_gen: Arc<Config> = state.config();

    loop {
        let cfg = state.config();
        if !Arc::ptr_eq(&cfg, &config_gen) {
            collectors.clear();
            config_gen = cfg.clone();
        }

        let members = state.controller().members();
        let deadline = cfg.collector_deadline();
        let settings = CollectorSettings::from_config(&cfg);

        let mut workers: JoinSet<(Member, Result<uplink_common::models::Metrics, CollectError>)> =
            JoinSet::new();
        for member in members {
            let collector = match collectors.get(&member.name) {
                Some((class, collector)) if *class == member.class => collector.clone(),
                _ => {
                    let built = Arc::new(if state.simulate() {
                        simulated_collector(member.class)
                    } else {
                        collector_for(member.class, &settings)
                    });
                    collectors.insert(member.name.clone(), (member.class, built.clone()));
                    built
                }
            };
            workers.spawn(async move {
                let result = collector.collect(&member, deadline).await;
                (member, result)
            });
        }
        collectors.retain(|name, _| state.controller().member(name).is_some());

        while let Some(joined) = workers.join_next().await {
            let Ok((member, result)) = joined else {
                continue;
            };
            let mut engine = state.engine().lock().await;
            match result {
                Ok(metrics) => {
                    if let Err(reason) = metrics.validate() {
                        tracing::warn!(member = %member.name, "rejecting metrics record: {reason}");
                        engine.observe_failure(
                            &member.name,
                            EventKind::CollectorFail,
                            &format!("invalid metrics: {reason}"),
                        );
                        continue;
                    }
                    let score = engine.observe_sample(&member, &metrics);
                    let method = metrics.method;
                    state.store().add_sample(&member.name, metrics, score);
                    emit(
                        state.store(),
                        sink.as_ref(),
                        Event::new(
                            EventKind::Sample,
                            Some(&member.name),
                            format!("method={} final={:.1}", method.as_str(), score.final_score),
                        ),
                    );
                }
                Err(CollectError::DeadlineExceeded) => {
                    engine.observe_failure(
                        &member.name,
                        EventKind::CollectorPartial,
                        "collector missed its deadline; partial result dropped",
                    );
                }
                Err(e) => {
                    engine.observe_failure(&member.name, EventKind::CollectorFail, &e.to_string());
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.poll_interval()) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Decision loop: serial with respect to itself. An overlapping cycle
/// (e.g. a long-running forced switch holding the engine) is skipped and
/// recorded, never queued.
pub async fn decision_loop(
    state: AppState,
    sink: Arc<dyn EventSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(state.config().decision_interval()) => {}
            _ = shutdown.changed() => return,
        }

        match state.engine().try_lock() {
            Ok(mut engine) => {
                let controller = state.controller().clone();
                // The tick may shell out through the route backend; keep
                // the executor responsive while it does.
                tokio::task::block_in_place(|| engine.tick(&controller, Utc::now()));
            }
            Err(_) => {
                state.stats().inc_skipped_ticks();
                emit(
                    state.store(),
                    sink.as_ref(),
                    Event::new(EventKind::SkippedTick, None, "previous cycle still in flight"),
                );
            }
        }
    }
}
