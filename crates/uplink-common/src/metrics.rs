//! Prometheus metrics rendering for the failover daemon.
//!
//! Renders a [`StatusSnapshot`] in Prometheus text exposition format,
//! suitable for scraping by Prometheus or compatible collectors.

use std::fmt::Write;

use crate::models::StatusSnapshot;

/// Render a status snapshot as Prometheus text exposition format.
pub fn render_prometheus(snapshot: &StatusSnapshot) -> String {
    let mut out = String::with_capacity(4096);

    // ── Per-member gauges ───────────────────────────────────────

    writeln!(
        out,
        "# HELP uplink_member_score_final Smoothed member score the decision engine compares (0-100)."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_member_score_final gauge").unwrap();
    for m in &snapshot.members {
        if let Some(score) = &m.score {
            writeln!(
                out,
                "uplink_member_score_final{{member=\"{}\",class=\"{}\",iface=\"{}\"}} {:.2}",
                m.member.name,
                m.member.class,
                m.member.iface,
                score.final_score
            )
            .unwrap();
        }
    }

    writeln!(
        out,
        "# HELP uplink_member_latency_ms Most recent latency observation in milliseconds."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_member_latency_ms gauge").unwrap();
    for m in &snapshot.members {
        if let Some(v) = m.latest.as_ref().and_then(|l| l.latency_ms) {
            writeln!(
                out,
                "uplink_member_latency_ms{{member=\"{}\",class=\"{}\"}} {:.3}",
                m.member.name, m.member.class, v
            )
            .unwrap();
        }
    }

    writeln!(
        out,
        "# HELP uplink_member_loss_percent Most recent packet loss observation (0-100)."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_member_loss_percent gauge").unwrap();
    for m in &snapshot.members {
        if let Some(v) = m.latest.as_ref().and_then(|l| l.loss_pct) {
            writeln!(
                out,
                "uplink_member_loss_percent{{member=\"{}\",class=\"{}\"}} {:.3}",
                m.member.name, m.member.class, v
            )
            .unwrap();
        }
    }

    writeln!(
        out,
        "# HELP uplink_member_jitter_ms Most recent jitter observation in milliseconds."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_member_jitter_ms gauge").unwrap();
    for m in &snapshot.members {
        if let Some(v) = m.latest.as_ref().and_then(|l| l.jitter_ms) {
            writeln!(
                out,
                "uplink_member_jitter_ms{{member=\"{}\",class=\"{}\"}} {:.3}",
                m.member.name, m.member.class, v
            )
            .unwrap();
        }
    }

    writeln!(
        out,
        "# HELP uplink_member_signal_dbm Most recent signal strength in dBm."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_member_signal_dbm gauge").unwrap();
    for m in &snapshot.members {
        if let Some(v) = m.latest.as_ref().and_then(|l| l.signal_dbm) {
            writeln!(
                out,
                "uplink_member_signal_dbm{{member=\"{}\",class=\"{}\"}} {:.1}",
                m.member.name, m.member.class, v
            )
            .unwrap();
        }
    }

    writeln!(
        out,
        "# HELP uplink_member_obstruction_percent Most recent sky obstruction (0-100, starlink only)."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_member_obstruction_percent gauge").unwrap();
    for m in &snapshot.members {
        if let Some(v) = m.latest.as_ref().and_then(|l| l.obstruction_pct) {
            writeln!(
                out,
                "uplink_member_obstruction_percent{{member=\"{}\",class=\"{}\"}} {:.2}",
                m.member.name, m.member.class, v
            )
            .unwrap();
        }
    }

    writeln!(
        out,
        "# HELP uplink_member_active Whether this member carries the default egress (1=active)."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_member_active gauge").unwrap();
    for m in &snapshot.members {
        let v = if snapshot.active_member.as_deref() == Some(m.member.name.as_str()) {
            1
        } else {
            0
        };
        writeln!(
            out,
            "uplink_member_active{{member=\"{}\",class=\"{}\",state=\"{}\"}} {v}",
            m.member.name,
            m.member.class,
            m.state.as_str()
        )
        .unwrap();
    }

    // ── Global counters ─────────────────────────────────────────

    writeln!(out, "# HELP uplink_members_total Number of known members.").unwrap();
    writeln!(out, "# TYPE uplink_members_total gauge").unwrap();
    writeln!(out, "uplink_members_total {}", snapshot.members.len()).unwrap();

    writeln!(
        out,
        "# HELP uplink_switches_total Total active-member switches since start."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_switches_total counter").unwrap();
    writeln!(out, "uplink_switches_total {}", snapshot.counters.switches_total).unwrap();

    writeln!(
        out,
        "# HELP uplink_collector_errors_total Collections that produced no usable fields."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_collector_errors_total counter").unwrap();
    writeln!(
        out,
        "uplink_collector_errors_total {}",
        snapshot.counters.collector_errors_total
    )
    .unwrap();

    writeln!(
        out,
        "# HELP uplink_decision_cycles_total Completed decision cycles since start."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_decision_cycles_total counter").unwrap();
    writeln!(
        out,
        "uplink_decision_cycles_total {}",
        snapshot.counters.decision_cycles_total
    )
    .unwrap();

    writeln!(
        out,
        "# HELP uplink_skipped_ticks_total Decision cycles skipped because one was in flight."
    )
    .unwrap();
    writeln!(out, "# TYPE uplink_skipped_ticks_total counter").unwrap();
    writeln!(
        out,
        "uplink_skipped_ticks_total {}",
        snapshot.counters.skipped_ticks_total
    )
    .unwrap();

    out
}
