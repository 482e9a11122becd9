use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::CacheStepRegistry;
use crate::error::{CIPulseError, Result};
use crate::models::{CacheOutcome, DropReason, JobRun, RunStatus, StepTiming, WorkflowRun};
use crate::providers::github::types::{parse_timestamp, RawJob, RawRecord, RawStep};

/// Outcome counts of one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub normalized: usize,
    pub dropped: BTreeMap<DropReason, usize>,
    /// Jobs left out of runs that were kept.
    pub dropped_jobs: usize,
}

impl NormalizeStats {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    fn record_drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason).or_default() += 1;
    }
}

/// Convert fetched records into the internal schema, keeping their order.
///
/// Records missing a mandatory field are dropped, logged and counted, as are
/// the `invalid_runs` the fetcher could not decode at all.
pub fn normalize_records(
    records: Vec<RawRecord>,
    invalid_runs: usize,
    cache_steps: &CacheStepRegistry,
) -> (Vec<WorkflowRun>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut runs = Vec::with_capacity(records.len());

    if invalid_runs > 0 {
        stats.dropped.insert(DropReason::InvalidRecord, invalid_runs);
    }

    for record in records {
        let run_id = record.run.id;
        let listed_jobs = record.jobs.len() + record.invalid_jobs;
        match normalize_run(record, cache_steps) {
            Ok(run) => {
                stats.dropped_jobs += listed_jobs - run.jobs.len();
                runs.push(run);
            }
            Err(CIPulseError::MalformedRecord(reason)) => {
                match run_id {
                    Some(id) => warn!("Dropping run {id}: {reason}"),
                    None => warn!("Dropping run without id: {reason}"),
                }
                stats.record_drop(reason);
            }
            Err(e) => warn!("Dropping run {run_id:?}: {e}"),
        }
    }

    stats.normalized = runs.len();
    info!(
        "Normalized {} runs, dropped {} runs and {} jobs",
        stats.normalized,
        stats.dropped_total(),
        stats.dropped_jobs
    );
    (runs, stats)
}

pub fn normalize_run(record: RawRecord, cache_steps: &CacheStepRegistry) -> Result<WorkflowRun> {
    let RawRecord { workflow, run, jobs, .. } = record;
    let malformed = CIPulseError::MalformedRecord;

    let id = run.id.ok_or(malformed(DropReason::MissingId))?;
    let started_at = parse_timestamp(run.run_started_at.as_deref())
        .or_else(|| parse_timestamp(run.created_at.as_deref()))
        .ok_or(malformed(DropReason::MissingStart))?;
    let status =
        map_status(run.status.as_deref(), run.conclusion.as_deref()).map_err(malformed)?;

    let completed_at = if status == RunStatus::InProgress {
        None
    } else {
        let end = parse_timestamp(run.updated_at.as_deref())
            .ok_or(malformed(DropReason::MissingEnd))?;
        Some(end.max(started_at))
    };

    let mut jobs: Vec<JobRun> = jobs
        .into_iter()
        .filter_map(|job| normalize_job(id, job, started_at, completed_at, cache_steps))
        .collect();
    jobs.sort_by_key(|j| (j.started_at.is_none(), j.started_at, j.id));

    Ok(WorkflowRun {
        id,
        workflow,
        event: run.event.unwrap_or_default(),
        branch: run.head_branch.unwrap_or_default(),
        started_at,
        completed_at,
        status,
        jobs,
    })
}

/// Map the API's `status` and `conclusion` pair onto [`RunStatus`].
fn map_status(
    status: Option<&str>,
    conclusion: Option<&str>,
) -> std::result::Result<RunStatus, DropReason> {
    match status {
        None => return Err(DropReason::MissingStatus),
        Some("completed") => {}
        Some(_) => return Ok(RunStatus::InProgress),
    }

    match conclusion {
        None => Err(DropReason::MissingStatus),
        Some("success") => Ok(RunStatus::Succeeded),
        Some("failure" | "startup_failure") => Ok(RunStatus::Failed),
        Some("cancelled") => Ok(RunStatus::Cancelled),
        Some("timed_out") => Ok(RunStatus::TimedOut),
        Some(c @ ("skipped" | "neutral" | "stale" | "action_required")) => {
            Err(DropReason::NotExecuted(c.to_string()))
        }
        Some(other) => Err(DropReason::UnknownConclusion(other.to_string())),
    }
}

fn normalize_job(
    run_id: u64,
    job: RawJob,
    run_start: DateTime<Utc>,
    run_end: Option<DateTime<Utc>>,
    cache_steps: &CacheStepRegistry,
) -> Option<JobRun> {
    let (Some(id), Some(name)) = (job.id, job.name) else {
        debug!("Skipping job without id or name in run {run_id}");
        return None;
    };

    let status = match map_status(job.status.as_deref(), job.conclusion.as_deref()) {
        Ok(status) => status,
        Err(reason) => {
            debug!("Skipping job '{name}' of run {run_id}: {reason}");
            return None;
        }
    };

    let clamp = |at: DateTime<Utc>| {
        let at = at.max(run_start);
        run_end.map_or(at, |end| at.min(end))
    };
    let started_at = parse_timestamp(job.started_at.as_deref()).map(clamp);
    let completed_at = parse_timestamp(job.completed_at.as_deref())
        .map(clamp)
        .map(|end| started_at.map_or(end, |start| end.max(start)));

    let mut steps = job.steps;
    steps.sort_by_key(|s| (s.number.is_none(), s.number));

    Some(JobRun {
        id,
        name,
        started_at,
        completed_at,
        status,
        steps: steps
            .into_iter()
            .filter_map(|step| normalize_step(step, cache_steps))
            .collect(),
    })
}

#[allow(clippy::cast_precision_loss)]
fn normalize_step(step: RawStep, cache_steps: &CacheStepRegistry) -> Option<StepTiming> {
    let name = step.name?;

    let duration_seconds = match (
        parse_timestamp(step.started_at.as_deref()),
        parse_timestamp(step.completed_at.as_deref()),
    ) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
        _ => 0.0,
    };

    let cache = if cache_steps.matches(&name) {
        match step.conclusion.as_deref() {
            Some("skipped") => CacheOutcome::Hit,
            Some("success" | "failure") => CacheOutcome::Miss,
            _ => CacheOutcome::NotApplicable,
        }
    } else {
        CacheOutcome::NotApplicable
    };

    Some(StepTiming {
        name,
        duration_seconds,
        cache,
    })
}
