use crate::config::Thresholds;
use crate::error::{CIPulseError, Result};
use crate::insights::{AggregateWindow, Severity, TrendFinding};

/// Metric deltas between two windows with enough samples to compare.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Deltas {
    /// Percent change of p90 duration; absent when the baseline p90 is zero.
    p90_pct: Option<f64>,
    /// Change of success rate in absolute percentage points.
    success_pts: Option<f64>,
}

/// Compare the current window of a workflow against its baseline.
///
/// Without a baseline, or with too few samples on either side, the finding is
/// `insufficient-data` and carries no severity judgement.
pub fn detect_trend(
    current: &AggregateWindow,
    baseline: Option<&AggregateWindow>,
    thresholds: &Thresholds,
) -> TrendFinding {
    let sample_count_baseline = baseline.map_or(0, |b| b.sample_count);

    let finding = |severity, deltas: Option<Deltas>, rationale| TrendFinding {
        workflow: current.workflow.clone(),
        severity,
        p90_duration_delta_pct: deltas.and_then(|d| d.p90_pct),
        success_rate_delta_pts: deltas.and_then(|d| d.success_pts),
        sample_count_current: current.sample_count,
        sample_count_baseline,
        rationale,
    };

    match compare(current, baseline, thresholds.min_samples) {
        Ok(deltas) => {
            let (severity, rationale) = classify(&deltas, thresholds);
            finding(severity, Some(deltas), rationale)
        }
        Err(e) => finding(Severity::InsufficientData, None, vec![e.to_string()]),
    }
}

fn compare(
    current: &AggregateWindow,
    baseline: Option<&AggregateWindow>,
    min_samples: usize,
) -> Result<Deltas> {
    let Some(baseline) = baseline else {
        return Err(CIPulseError::InsufficientData(
            "no baseline history for this workflow".to_string(),
        ));
    };

    for (label, window) in [("current", current), ("baseline", baseline)] {
        if window.sample_count < min_samples {
            return Err(CIPulseError::InsufficientData(format!(
                "{label} window has {} completed runs, need {min_samples}",
                window.sample_count
            )));
        }
    }

    let p90_pct = match (current.p90_seconds(), baseline.p90_seconds()) {
        (Some(cur), Some(base)) if base > 0.0 => Some((cur - base) / base * 100.0),
        _ => None,
    };

    let success_pts = match (current.success_rate, baseline.success_rate) {
        (Some(cur), Some(base)) => Some((cur - base) * 100.0),
        _ => None,
    };

    Ok(Deltas {
        p90_pct,
        success_pts,
    })
}

/// First matching tier wins; only regressions count.
fn classify(deltas: &Deltas, thresholds: &Thresholds) -> (Severity, Vec<String>) {
    let success_drop = deltas.success_pts.map(|d| -d).filter(|d| *d > 0.0);
    let p90_growth = deltas.p90_pct.filter(|d| *d > 0.0);

    let tiers = [
        (
            Severity::Critical,
            thresholds.critical_success_drop_pts,
            thresholds.critical_p90_growth_pct,
        ),
        (
            Severity::Warning,
            thresholds.warning_success_drop_pts,
            thresholds.warning_p90_growth_pct,
        ),
    ];

    for (severity, drop_limit, growth_limit) in tiers {
        let mut rationale = Vec::new();

        if let Some(drop) = success_drop.filter(|d| *d > drop_limit) {
            rationale.push(format!(
                "success rate dropped {drop:.1} pts (> {drop_limit} pts)"
            ));
        }
        if let Some(growth) = p90_growth.filter(|g| *g > growth_limit) {
            rationale.push(format!(
                "p90 duration grew {growth:.1}% (> {growth_limit}%)"
            ));
        }

        if !rationale.is_empty() {
            return (severity, rationale);
        }
    }

    (Severity::None, vec![])
}
