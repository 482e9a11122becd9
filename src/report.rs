use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::insights::{AggregateWindow, Severity, TrendFinding};
use crate::models::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// How complete the fetched history is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCompleteness {
    pub pages_fetched: usize,
    pub runs_fetched: usize,
    pub runs_normalized: usize,
    pub dropped_records: usize,
    pub drop_reasons: BTreeMap<String, usize>,
    /// Jobs left out of analyzed runs.
    #[serde(default)]
    pub dropped_jobs: usize,
    pub retries: usize,
    pub transient_failures: usize,
    pub rate_limit_waits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub workflow: String,
    pub severity: Severity,
    pub p90_duration_delta_pct: Option<f64>,
    pub success_rate_delta_pts: Option<f64>,
    pub sample_count_current: usize,
    pub sample_count_baseline: usize,
    pub rationale: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<AggregateWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub repository: String,
    pub generated_at: DateTime<Utc>,
    pub current_window: TimeWindow,
    pub baseline_window: Option<TimeWindow>,
    /// Set when the fetch was cancelled or gave up on part of the history.
    pub partial: bool,
    pub summary: DataCompleteness,
    pub findings: Vec<ReportEntry>,
}

impl Report {
    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }

    pub fn render(&self, format: OutputFormat, pretty: bool) -> Result<String> {
        match format {
            OutputFormat::Json if pretty => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Json => Ok(serde_json::to_string(self)?),
            OutputFormat::Text => Ok(self.render_text()),
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();

        for entry in &self.findings {
            let _ = writeln!(
                out,
                "{:<17} {:<30} p90 {:>9}  success {:>10}  samples {}/{}{}",
                entry.severity.label().to_uppercase(),
                entry.workflow,
                format_delta(entry.p90_duration_delta_pct, "%"),
                format_delta(entry.success_rate_delta_pts, " pts"),
                entry.sample_count_current,
                entry.sample_count_baseline,
                format_rationale(&entry.rationale),
            );
        }

        let summary = &self.summary;
        let _ = writeln!(
            out,
            "\n{} runs analyzed ({} fetched, {} dropped), {} pages, {} retries, {} rate-limit waits",
            summary.runs_normalized,
            summary.runs_fetched,
            summary.dropped_records,
            summary.pages_fetched,
            summary.retries,
            summary.rate_limit_waits,
        );
        for (reason, count) in &summary.drop_reasons {
            let _ = writeln!(out, "  dropped {count}: {reason}");
        }
        if summary.dropped_jobs > 0 {
            let _ = writeln!(out, "  {} jobs left out of analyzed runs", summary.dropped_jobs);
        }
        if self.partial {
            let _ = writeln!(
                out,
                "PARTIAL DATA: history is incomplete ({} transient failures)",
                summary.transient_failures
            );
        }

        out
    }
}

fn format_delta(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:+.1}{unit}"))
}

fn format_rationale(rationale: &[String]) -> String {
    if rationale.is_empty() {
        String::new()
    } else {
        format!("  ({})", rationale.join("; "))
    }
}

/// Pair each current window with its finding and order the result.
pub fn build_entries(
    windows: Vec<AggregateWindow>,
    findings: Vec<TrendFinding>,
    recommend: impl Fn(&AggregateWindow) -> Vec<String>,
) -> Vec<ReportEntry> {
    let mut by_workflow: BTreeMap<String, AggregateWindow> = windows
        .into_iter()
        .map(|w| (w.workflow.clone(), w))
        .collect();

    let mut entries: Vec<ReportEntry> = findings
        .into_iter()
        .map(|finding| {
            let current = by_workflow.remove(&finding.workflow);
            ReportEntry {
                recommendations: current.as_ref().map(&recommend).unwrap_or_default(),
                workflow: finding.workflow,
                severity: finding.severity,
                p90_duration_delta_pct: finding.p90_duration_delta_pct,
                success_rate_delta_pts: finding.success_rate_delta_pts,
                sample_count_current: finding.sample_count_current,
                sample_count_baseline: finding.sample_count_baseline,
                rationale: finding.rationale,
                current,
            }
        })
        .collect();

    sort_entries(&mut entries);
    entries
}

/// Severity tier first, then the largest p90 movement, then name.
pub fn sort_entries(entries: &mut [ReportEntry]) {
    entries.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then_with(|| compare_delta_desc(a.p90_duration_delta_pct, b.p90_duration_delta_pct))
            .then_with(|| a.workflow.cmp(&b.workflow))
    });
}

fn compare_delta_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.abs().total_cmp(&a.abs()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
