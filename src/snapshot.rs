use std::path::Path;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CIPulseError, Result};
use crate::insights::AggregateWindow;
use crate::models::TimeWindow;
use crate::report::Report;

/// Saved aggregates of one analysis, reusable as a later baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub repository: String,
    pub captured_at: DateTime<Utc>,
    pub window: TimeWindow,
    /// The analysis that produced it saw incomplete history.
    #[serde(default)]
    pub partial: bool,
    pub workflows: Vec<AggregateWindow>,
}

impl BaselineSnapshot {
    /// Capture the current-window aggregates of a finished analysis.
    pub fn from_report(report: &Report) -> Self {
        Self {
            repository: report.repository.clone(),
            captured_at: report.generated_at,
            window: report.current_window,
            partial: report.partial,
            workflows: report
                .findings
                .iter()
                .filter_map(|entry| entry.current.clone())
                .collect(),
        }
    }

    pub fn load(path: &Path, repository: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&contents)?;

        if snapshot.repository != repository {
            return Err(CIPulseError::Config(format!(
                "Baseline snapshot {} belongs to '{}', not '{repository}'",
                path.display(),
                snapshot.repository
            )));
        }

        if snapshot.partial {
            warn!(
                "Baseline snapshot {} was captured from incomplete history, comparisons may be skewed",
                path.display()
            );
        }
        info!(
            "Loaded baseline snapshot with {} workflows from {}",
            snapshot.workflows.len(),
            path.display()
        );
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Baseline snapshot written to: {}", path.display());
        Ok(())
    }

    pub fn workflow(&self, name: &str) -> Option<&AggregateWindow> {
        self.workflows.iter().find(|w| w.workflow == name)
    }
}
