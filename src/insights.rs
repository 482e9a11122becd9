use serde::{Deserialize, Serialize};

use crate::models::TimeWindow;

/// Duration distribution of the completed runs in a window, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub p50_seconds: f64,
    pub p90_seconds: f64,
    pub p99_seconds: f64,
    pub mean_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub name: String,
    pub samples: usize,
    pub p50_seconds: f64,
    pub p90_seconds: f64,
    pub mean_seconds: f64,
    pub success_rate: Option<f64>,
}

/// Statistics for one workflow over one time window.
///
/// `sample_count` counts completed runs (succeeded, failed, timed out). When it
/// is zero, `durations` and `success_rate` are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateWindow {
    pub workflow: String,
    pub window: TimeWindow,
    pub sample_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    /// Only populated when live-run visibility is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<usize>,
    pub durations: Option<DurationStats>,
    pub success_rate: Option<f64>,
    pub cache_hit_ratio: Option<f64>,
    pub slowest_jobs: Vec<JobStats>,
}

impl AggregateWindow {
    pub fn p90_seconds(&self) -> Option<f64> {
        self.durations.as_ref().map(|d| d.p90_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    None,
    Warning,
    Critical,
    InsufficientData,
}

impl Severity {
    /// Report tier, lowest first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Warning => 1,
            Self::None => 2,
            Self::InsufficientData => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::InsufficientData => "insufficient-data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendFinding {
    pub workflow: String,
    pub severity: Severity,
    pub p90_duration_delta_pct: Option<f64>,
    pub success_rate_delta_pts: Option<f64>,
    pub sample_count_current: usize,
    pub sample_count_baseline: usize,
    pub rationale: Vec<String>,
}
