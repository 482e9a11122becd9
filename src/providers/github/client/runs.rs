use chrono::{DateTime, Utc};
use log::debug;
use url::Url;

use super::core::GitHubClient;
use crate::error::Result;
use crate::providers::github::types::{
    decode_entries, Decoded, JobsPage, RawJob, RawWorkflowRun, RepoId, WorkflowDto,
    WorkflowRunsPage, WorkflowsPage,
};

const PER_PAGE: &str = "100";

/// Lazy, resumable walk over the run pages of one workflow, newest first.
///
/// The cursor only advances after a page was fetched successfully, so a failed
/// `next_page` can simply be called again.
pub struct RunPager<'a> {
    client: &'a GitHubClient,
    cursor: Option<Url>,
    since: DateTime<Utc>,
    listed: u64,
    total_count: Option<u64>,
    reached_window_start: bool,
}

impl RunPager<'_> {
    pub async fn next_page(&mut self) -> Result<Option<Decoded<RawWorkflowRun>>> {
        let Some(url) = self.cursor.clone() else {
            return Ok(None);
        };

        let (page, next): (WorkflowRunsPage, _) = self.client.get_page(&url).await?;
        let listed = page.workflow_runs.len();
        self.listed += listed as u64;
        if page.total_count.is_some() {
            self.total_count = page.total_count;
        }
        let runs: Decoded<RawWorkflowRun> = decode_entries(page.workflow_runs, "run");

        self.reached_window_start = runs
            .entries
            .iter()
            .filter_map(RawWorkflowRun::created)
            .any(|created| created < self.since);

        self.cursor = if listed == 0 || self.reached_window_start {
            None
        } else {
            next
        };

        debug!("Fetched {listed} runs from {url}");
        Ok(Some(runs))
    }

    pub fn cursor(&self) -> Option<&Url> {
        self.cursor.as_ref()
    }

    /// Runs listed and runs reported by the API, when paging ended short of the total.
    ///
    /// The API stops listing after 1,000 results of a `created` query, so a
    /// busy workflow can run out of pages before its window start.
    pub fn truncated(&self) -> Option<(u64, u64)> {
        if self.cursor.is_some() || self.reached_window_start {
            return None;
        }
        self.total_count
            .filter(|&total| self.listed < total)
            .map(|total| (self.listed, total))
    }
}

impl GitHubClient {
    pub async fn list_workflows(&self, repo: &RepoId) -> Result<Vec<WorkflowDto>> {
        let mut url = self.repo_url(repo, "actions/workflows")?;
        url.query_pairs_mut().append_pair("per_page", PER_PAGE);

        let mut workflows = Vec::new();
        let mut cursor = Some(url);
        while let Some(url) = cursor {
            let (page, next): (WorkflowsPage, _) = self.get_page(&url).await?;
            workflows.extend(page.workflows);
            cursor = next;
        }

        Ok(workflows)
    }

    /// Pager over runs of `workflow_id` created at or after `since`.
    pub fn run_pager(
        &self,
        repo: &RepoId,
        workflow_id: u64,
        since: DateTime<Utc>,
    ) -> Result<RunPager<'_>> {
        let mut url = self.repo_url(repo, &format!("actions/workflows/{workflow_id}/runs"))?;
        url.query_pairs_mut()
            .append_pair("per_page", PER_PAGE)
            .append_pair(
                "created",
                &format!(">={}", since.format("%Y-%m-%dT%H:%M:%SZ")),
            );

        Ok(RunPager {
            client: self,
            cursor: Some(url),
            since,
            listed: 0,
            total_count: None,
            reached_window_start: false,
        })
    }

    /// Jobs of the latest attempt of a run, with their steps.
    pub async fn fetch_run_jobs(&self, repo: &RepoId, run_id: u64) -> Result<Decoded<RawJob>> {
        let mut url = self.repo_url(repo, &format!("actions/runs/{run_id}/jobs"))?;
        url.query_pairs_mut()
            .append_pair("filter", "latest")
            .append_pair("per_page", PER_PAGE);

        let mut jobs = Decoded::default();
        let mut cursor = Some(url);
        while let Some(url) = cursor {
            let (page, next): (JobsPage, _) = self.get_page(&url).await?;
            let decoded = decode_entries(page.jobs, "job");
            jobs.entries.extend(decoded.entries);
            jobs.invalid += decoded.invalid;
            cursor = next;
        }

        Ok(jobs)
    }
}
