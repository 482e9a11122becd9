use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::stats::{mean, percentile, ratio};
use crate::insights::{AggregateWindow, DurationStats, JobStats};
use crate::models::{CacheOutcome, JobRun, RunStatus, TimeWindow, WorkflowRun};

const SLOWEST_JOBS: usize = 5;

/// Group the runs started inside `window` by workflow name and summarize each group.
///
/// Output is ordered by workflow name and depends only on the input values.
pub fn aggregate_windows(
    runs: &[WorkflowRun],
    window: &TimeWindow,
    include_live: bool,
) -> Vec<AggregateWindow> {
    let mut groups: BTreeMap<&str, Vec<&WorkflowRun>> = BTreeMap::new();
    for run in runs.iter().filter(|r| window.contains(r.started_at)) {
        groups.entry(run.workflow.as_str()).or_default().push(run);
    }

    groups
        .into_iter()
        .map(|(workflow, mut group)| {
            group.sort_by_key(|r| (r.started_at, r.id));
            aggregate_workflow(workflow, &group, window, include_live)
        })
        .collect()
}

fn aggregate_workflow(
    workflow: &str,
    runs: &[&WorkflowRun],
    window: &TimeWindow,
    include_live: bool,
) -> AggregateWindow {
    let count = |status: RunStatus| runs.iter().filter(|r| r.status == status).count();
    let succeeded = count(RunStatus::Succeeded);
    let failed = count(RunStatus::Failed);
    let timed_out = count(RunStatus::TimedOut);
    let cancelled = count(RunStatus::Cancelled);
    let sample_count = succeeded + failed + timed_out;

    let durations = ranked_durations(
        runs.iter()
            .filter(|r| r.status.is_completed())
            .filter_map(|r| Some((r.duration_seconds()?, r.started_at, r.id))),
    );

    AggregateWindow {
        workflow: workflow.to_string(),
        window: *window,
        sample_count,
        succeeded,
        failed,
        timed_out,
        cancelled,
        pending: include_live.then(|| count(RunStatus::InProgress)),
        durations: duration_stats(&durations),
        success_rate: ratio(succeeded, sample_count),
        cache_hit_ratio: cache_hit_ratio(runs),
        slowest_jobs: slowest_jobs(runs),
    }
}

/// Sort durations ascending; equal durations rank by start time, then id.
fn ranked_durations(samples: impl Iterator<Item = (f64, DateTime<Utc>, u64)>) -> Vec<f64> {
    let mut samples: Vec<_> = samples.collect();
    samples.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    samples.into_iter().map(|(d, _, _)| d).collect()
}

fn duration_stats(sorted: &[f64]) -> Option<DurationStats> {
    Some(DurationStats {
        p50_seconds: percentile(sorted, 0.50)?,
        p90_seconds: percentile(sorted, 0.90)?,
        p99_seconds: percentile(sorted, 0.99)?,
        mean_seconds: mean(sorted)?,
    })
}

fn cache_hit_ratio(runs: &[&WorkflowRun]) -> Option<f64> {
    let (hits, misses) = runs
        .iter()
        .flat_map(|r| r.jobs.iter())
        .flat_map(|j| j.steps.iter())
        .fold((0, 0), |(hits, misses), step| match step.cache {
            CacheOutcome::Hit => (hits + 1, misses),
            CacheOutcome::Miss => (hits, misses + 1),
            CacheOutcome::NotApplicable => (hits, misses),
        });

    ratio(hits, hits + misses)
}

#[derive(Default)]
struct JobSamples {
    durations: Vec<(f64, DateTime<Utc>, u64)>,
    succeeded: usize,
    completed: usize,
}

fn slowest_jobs(runs: &[&WorkflowRun]) -> Vec<JobStats> {
    // Runs arrive in rank order, so first-seen order is deterministic too.
    let mut by_name: IndexMap<&str, JobSamples> = IndexMap::new();

    for run in runs {
        for job in run.jobs.iter().filter(|j| j.status.is_completed()) {
            let samples = by_name.entry(job.name.as_str()).or_default();
            samples.completed += 1;
            if job.status == RunStatus::Succeeded {
                samples.succeeded += 1;
            }
            if let Some(duration) = job.duration_seconds() {
                samples
                    .durations
                    .push((duration, job_rank_time(run, job), job.id));
            }
        }
    }

    let mut jobs: Vec<JobStats> = by_name
        .into_iter()
        .filter_map(|(name, samples)| {
            let sorted = ranked_durations(samples.durations.into_iter());
            Some(JobStats {
                name: name.to_string(),
                samples: sorted.len(),
                p50_seconds: percentile(&sorted, 0.50)?,
                p90_seconds: percentile(&sorted, 0.90)?,
                mean_seconds: mean(&sorted)?,
                success_rate: ratio(samples.succeeded, samples.completed),
            })
        })
        .collect();

    jobs.sort_by(|a, b| {
        b.p90_seconds
            .total_cmp(&a.p90_seconds)
            .then_with(|| a.name.cmp(&b.name))
    });
    jobs.truncate(SLOWEST_JOBS);
    jobs
}

fn job_rank_time(run: &WorkflowRun, job: &JobRun) -> DateTime<Utc> {
    job.started_at.unwrap_or(run.started_at)
}
