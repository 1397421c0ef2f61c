//! # Member Scoring
//!
//! Maps a metrics record to an instant score in [0, 100] with one
//! piecewise-linear curve per factor, combines the factors under the
//! configured weight vector, and smooths across cycles with an EWMA.
//!
//! Missing factors have their weight redistributed proportionally over the
//! factors that are present. Which factors apply at all depends on the
//! member's class: signal only makes sense for radio uplinks, obstruction
//! only for Starlink.

use uplink_common::config::ScoringWeights;
use uplink_common::models::{MemberClass, Metrics};

/// Latency curve: 100 at <= 20 ms down to 0 at >= 500 ms.
pub fn latency_score(ms: f64) -> f64 {
    ramp_down(ms, 20.0, 500.0)
}

/// Loss curve: 100 at 0 % down to 0 at >= 5 %.
pub fn loss_score(pct: f64) -> f64 {
    ramp_down(pct, 0.0, 5.0)
}

/// Jitter curve: 100 at <= 5 ms down to 0 at >= 100 ms.
pub fn jitter_score(ms: f64) -> f64 {
    ramp_down(ms, 5.0, 100.0)
}

/// Signal curve: 100 at >= -65 dBm down to 0 at <= -110 dBm.
pub fn signal_score(dbm: f64) -> f64 {
    ramp_down(-dbm, 65.0, 110.0)
}

/// Obstruction curve: `100 - 2 * percent`, clamped.
pub fn obstruction_score(pct: f64) -> f64 {
    (100.0 - pct * 2.0).clamp(0.0, 100.0)
}

/// Linear ramp from 100 at `best` to 0 at `worst` (`best < worst`).
fn ramp_down(value: f64, best: f64, worst: f64) -> f64 {
    if value <= best {
        100.0
    } else if value >= worst {
        0.0
    } else {
        100.0 * (worst - value) / (worst - best)
    }
}

/// Whether the signal factor applies to this class.
fn signal_applies(class: MemberClass) -> bool {
    matches!(
        class,
        MemberClass::Starlink | MemberClass::Cellular | MemberClass::Wifi
    )
}

/// Compute the instant score for one metrics record, or `None` when no
/// applicable factor is present (the caller emits a `collector_fail`).
pub fn instant_score(class: MemberClass, metrics: &Metrics, weights: &ScoringWeights) -> Option<f64> {
    let mut factors: Vec<(f64, f64)> = Vec::with_capacity(5);

    if let Some(ms) = metrics.latency_ms {
        factors.push((weights.latency, latency_score(ms)));
    }
    if let Some(pct) = metrics.loss_pct {
        factors.push((weights.loss, loss_score(pct)));
    }
    if let Some(ms) = metrics.jitter_ms {
        factors.push((weights.jitter, jitter_score(ms)));
    }
    if signal_applies(class) {
        if let Some(dbm) = metrics.signal_dbm {
            factors.push((weights.signal, signal_score(dbm)));
        }
    }
    if class == MemberClass::Starlink {
        if let Some(pct) = metrics.obstruction_pct {
            factors.push((weights.obstruction, obstruction_score(pct)));
        }
    }

    let weight_sum: f64 = factors.iter().map(|(w, _)| w).sum();
    if weight_sum <= 0.0 {
        return None;
    }

    // Redistribute the missing factors' weight proportionally by dividing
    // through the sum of present weights.
    let raw: f64 = factors.iter().map(|(w, s)| w / weight_sum * s).sum();
    Some(raw.clamp(0.0, 100.0))
}

/// One EWMA step: `alpha * instant + (1 - alpha) * prev`. The first sample
/// seeds the average.
pub fn ewma_step(alpha: f64, instant: f64, prev: Option<f64>) -> f64 {
    let next = match prev {
        Some(p) => alpha * instant + (1.0 - alpha) * p,
        None => instant,
    };
    next.clamp(0.0, 100.0)
}

/// Additive bias derived from the member's static weight, bounded to ±5.
/// The default weight range 0–100 spans the full band.
pub fn class_bias(weight: u32) -> f64 {
    ((weight as f64 - 50.0) / 10.0).clamp(-5.0, 5.0)
}

/// Final score the decision engine compares: smoothed score plus bias,
/// clamped back to [0, 100].
pub fn final_score(ewma: f64, weight: u32) -> f64 {
    (ewma + class_bias(weight)).clamp(0.0, 100.0)
}
