use crate::insights::AggregateWindow;

const LOW_SUCCESS_RATE: f64 = 0.90;
const SLOW_MEDIAN_SECONDS: f64 = 10.0 * 60.0;
const SLOW_JOB_SECONDS: f64 = 5.0 * 60.0;
const LOW_CACHE_HIT_RATIO: f64 = 0.50;

/// Optimization hints for a workflow based on its current window.
pub fn recommendations(window: &AggregateWindow) -> Vec<String> {
    let mut hints = Vec::new();

    if let Some(rate) = window.success_rate.filter(|r| *r < LOW_SUCCESS_RATE) {
        hints.push(format!(
            "Low success rate ({:.1}%). Investigate flaky tests or infrastructure issues.",
            rate * 100.0
        ));
    }

    if let Some(median) = window
        .durations
        .as_ref()
        .map(|d| d.p50_seconds)
        .filter(|m| *m > SLOW_MEDIAN_SECONDS)
    {
        hints.push(format!(
            "High median duration ({:.1} min). Consider parallelization or caching.",
            median / 60.0
        ));
    }

    if let Some(job) = window
        .slowest_jobs
        .first()
        .filter(|j| j.p90_seconds > SLOW_JOB_SECONDS)
    {
        hints.push(format!(
            "Slowest job '{}' takes {:.1} min at p90. Consider splitting or optimizing it.",
            job.name,
            job.p90_seconds / 60.0
        ));
    }

    if let Some(ratio) = window.cache_hit_ratio.filter(|r| *r < LOW_CACHE_HIT_RATIO) {
        hints.push(format!(
            "Low dependency cache hit ratio ({:.0}%). Review cache keys.",
            ratio * 100.0
        ));
    }

    hints
}
