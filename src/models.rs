use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Final (or current) state of a workflow run or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    InProgress,
}

impl RunStatus {
    /// Completed runs reflect real workload cost and feed duration and success statistics.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Whether a cache-guarded step reused its dependency cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheOutcome {
    Hit,
    Miss,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub name: String,
    pub duration_seconds: f64,
    pub cache: CacheOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: u64,
    pub name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub steps: Vec<StepTiming>,
}

impl JobRun {
    pub fn duration_seconds(&self) -> Option<f64> {
        elapsed_seconds(self.started_at?, self.completed_at?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub workflow: String,
    pub event: String,
    pub branch: String,
    pub started_at: DateTime<Utc>,
    /// Absent while the run is still in progress.
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub jobs: Vec<JobRun>,
}

impl WorkflowRun {
    pub fn duration_seconds(&self) -> Option<f64> {
        elapsed_seconds(self.started_at, self.completed_at?)
    }
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<f64> {
    let millis = (end - start).num_milliseconds();
    (millis >= 0).then(|| millis as f64 / 1000.0)
}

/// Why a raw record was discarded during normalization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingId,
    MissingStart,
    MissingEnd,
    MissingStatus,
    NotExecuted(String),
    UnknownConclusion(String),
    /// The API returned an entry that does not fit the expected shape.
    InvalidRecord,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingId => f.write_str("missing identifier"),
            Self::MissingStart => f.write_str("missing start timestamp"),
            Self::MissingEnd => f.write_str("missing end timestamp"),
            Self::MissingStatus => f.write_str("missing status"),
            Self::NotExecuted(c) => write!(f, "not executed ({c})"),
            Self::UnknownConclusion(c) => write!(f, "unknown conclusion ({c})"),
            Self::InvalidRecord => f.write_str("invalid record"),
        }
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days`-long window ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, days: u32) -> Self {
        Self::new(end - Duration::days(i64::from(days)), end)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    /// The window of equal length ending `offset_days` before this one ends.
    pub fn shifted_back(&self, offset_days: u32) -> Self {
        let offset = Duration::days(i64::from(offset_days));
        Self::new(self.start - offset, self.end - offset)
    }

    /// Smallest window covering both `self` and `other`.
    pub fn span(&self, other: &Self) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_only_terminal_executions_are_completed() {
        assert!(RunStatus::Succeeded.is_completed());
        assert!(RunStatus::Failed.is_completed());
        assert!(RunStatus::TimedOut.is_completed());
        assert!(!RunStatus::Cancelled.is_completed());
        assert!(!RunStatus::InProgress.is_completed());
    }

    #[test]
    fn test_open_ended_run_has_no_duration() {
        let run = WorkflowRun {
            id: 1,
            workflow: "CI".to_string(),
            event: "push".to_string(),
            branch: "main".to_string(),
            started_at: at(1),
            completed_at: None,
            status: RunStatus::InProgress,
            jobs: vec![],
        };
        assert_eq!(run.duration_seconds(), None);

        let finished = WorkflowRun {
            completed_at: Some(at(2)),
            status: RunStatus::Succeeded,
            ..run
        };
        assert_eq!(finished.duration_seconds(), Some(3600.0));
    }

    #[test]
    fn test_window_is_half_open() {
        let window = TimeWindow::new(at(1), at(3));
        assert!(window.contains(at(1)));
        assert!(window.contains(at(2)));
        assert!(!window.contains(at(3)));
        assert!(!window.contains(at(0)));
    }

    #[test]
    fn test_shifted_back_keeps_length() {
        let current = TimeWindow::ending_at(at(12), 30);
        let baseline = current.shifted_back(30);
        assert_eq!(baseline.end, current.start);
        assert_eq!(baseline.end - baseline.start, current.end - current.start);
        assert_eq!(current.span(&baseline), TimeWindow::new(baseline.start, current.end));
    }
}
