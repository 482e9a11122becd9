use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use super::client::{FetchCounters, GitHubClient};
use super::fetcher::fetch_history;
use super::normalize::{normalize_records, NormalizeStats};
use super::rate_limit::RateLimitBudget;
use super::retry::RetryPolicy;
use super::types::RepoId;
use crate::analysis::{aggregate_windows, detect_trend, recommendations};
use crate::auth::Token;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::insights::TrendFinding;
use crate::models::TimeWindow;
use crate::report::{build_entries, DataCompleteness, Report};
use crate::snapshot::BaselineSnapshot;

/// Where the comparison baseline comes from.
#[derive(Debug, Clone)]
pub enum BaselineSource {
    /// Fetched from the API along with the current window.
    Fetch(TimeWindow),
    /// Aggregates saved by an earlier analysis.
    Snapshot(BaselineSnapshot),
}

impl BaselineSource {
    pub fn window(&self) -> TimeWindow {
        match self {
            Self::Fetch(window) => *window,
            Self::Snapshot(snapshot) => snapshot.window,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub workflow: Option<String>,
    pub current: TimeWindow,
    pub baseline: BaselineSource,
}

pub struct GitHubProvider {
    pub client: GitHubClient,
    pub repo: RepoId,
}

impl GitHubProvider {
    pub fn new(
        base_url: &str,
        repo: RepoId,
        token: Option<Token>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = GitHubClient::new(base_url, token, Arc::new(RateLimitBudget::new()), retry)?;
        Ok(Self { client, repo })
    }

    pub async fn collect_insights(
        &self,
        request: &AnalysisRequest,
        config: &AnalysisConfig,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        info!("Starting insights collection for repository: {}", self.repo);

        let fetch_window = match &request.baseline {
            BaselineSource::Fetch(baseline) => request.current.span(baseline),
            BaselineSource::Snapshot(_) => request.current,
        };

        let outcome = fetch_history(
            &self.client,
            &self.repo,
            request.workflow.as_deref(),
            fetch_window.start,
            config.concurrency,
            cancel,
        )
        .await?;
        if outcome.partial {
            warn!("Fetched data is incomplete, the report will be marked partial");
        }

        let runs_fetched = outcome.records.len() + outcome.invalid_runs;
        let (runs, stats) =
            normalize_records(outcome.records, outcome.invalid_runs, &config.cache_steps);

        let current = aggregate_windows(&runs, &request.current, config.include_live);
        if current.is_empty() {
            warn!("No runs of {} in the current window", self.repo);
        }

        let fetched_baseline = match &request.baseline {
            BaselineSource::Fetch(window) => aggregate_windows(&runs, window, false),
            BaselineSource::Snapshot(_) => Vec::new(),
        };
        let baseline_of = |workflow: &str| match &request.baseline {
            BaselineSource::Fetch(_) => fetched_baseline.iter().find(|w| w.workflow == workflow),
            BaselineSource::Snapshot(snapshot) => snapshot.workflow(workflow),
        };

        let findings: Vec<TrendFinding> = current
            .iter()
            .map(|window| detect_trend(window, baseline_of(&window.workflow), &config.thresholds))
            .collect();

        Ok(Report {
            repository: self.repo.to_string(),
            generated_at: Utc::now(),
            current_window: request.current,
            baseline_window: Some(request.baseline.window()),
            partial: outcome.partial,
            summary: self.completeness(runs_fetched, &stats),
            findings: build_entries(current, findings, recommendations),
        })
    }

    fn completeness(&self, runs_fetched: usize, stats: &NormalizeStats) -> DataCompleteness {
        let counters = &self.client.counters;
        let mut drop_reasons = BTreeMap::new();
        for (reason, count) in &stats.dropped {
            *drop_reasons.entry(reason.to_string()).or_default() += count;
        }

        DataCompleteness {
            pages_fetched: FetchCounters::get(&counters.pages),
            runs_fetched,
            runs_normalized: stats.normalized,
            dropped_records: stats.dropped_total(),
            drop_reasons,
            dropped_jobs: stats.dropped_jobs,
            retries: FetchCounters::get(&counters.retries),
            transient_failures: FetchCounters::get(&counters.transient_failures),
            rate_limit_waits: FetchCounters::get(&counters.rate_limit_waits),
        }
    }
}
