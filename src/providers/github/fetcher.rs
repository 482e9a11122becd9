use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::client::GitHubClient;
use super::types::{parse_timestamp, Decoded, RawJob, RawRecord, RepoId, WorkflowDto};
use crate::error::{CIPulseError, Result};

/// Raw records of one fetch, newest first.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<RawRecord>,
    /// Listed runs that could not be decoded.
    pub invalid_runs: usize,
    /// Set when a workflow or a run's jobs could not be fetched completely.
    pub partial: bool,
}

impl FetchOutcome {
    fn merge(mut self, other: Self) -> Self {
        self.records.extend(other.records);
        self.invalid_runs += other.invalid_runs;
        self.partial |= other.partial;
        self
    }
}

/// Fetch every run created at or after `since`, with jobs, for the selected workflows.
///
/// Workflows are fetched concurrently, at most `concurrency` at a time.
/// Retries that run out, cancellation and listings the API cut short leave
/// the outcome partial. Entries that do not decode are counted and skipped.
/// Any other failure aborts the fetch.
pub async fn fetch_history(
    client: &GitHubClient,
    repo: &RepoId,
    filter: Option<&str>,
    since: DateTime<Utc>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<FetchOutcome> {
    let workflows = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            warn!("Fetch cancelled before workflows of {repo} were listed");
            return Ok(FetchOutcome { partial: true, ..FetchOutcome::default() });
        }
        listed = client.list_workflows(repo) => listed?,
    };

    let selected = select_workflows(workflows, filter, repo)?;
    info!(
        "Fetching runs of {} workflows of {repo} created since {since}",
        selected.len()
    );

    let mut outcome = stream::iter(selected)
        .map(|workflow| fetch_workflow(client, repo, workflow, since, cancel))
        .buffer_unordered(concurrency.max(1))
        .try_fold(FetchOutcome::default(), |acc, next| async move {
            Ok(acc.merge(next))
        })
        .await?;

    outcome.records.sort_by(|a, b| {
        record_start(b)
            .cmp(&record_start(a))
            .then_with(|| a.run.id.cmp(&b.run.id))
    });

    info!(
        "Fetched {} runs of {repo}{}",
        outcome.records.len(),
        if outcome.partial { " (partial)" } else { "" }
    );
    if let Some(remaining) = client.budget.current().await.remaining {
        debug!("{remaining} API requests left in the current rate-limit window");
    }
    Ok(outcome)
}

fn select_workflows(
    workflows: Vec<WorkflowDto>,
    filter: Option<&str>,
    repo: &RepoId,
) -> Result<Vec<WorkflowDto>> {
    let Some(filter) = filter else {
        return Ok(workflows);
    };

    let selected: Vec<_> = workflows.into_iter().filter(|w| w.matches(filter)).collect();
    if selected.is_empty() {
        return Err(CIPulseError::NotFound(format!(
            "No workflow named '{filter}' in {repo}"
        )));
    }
    Ok(selected)
}

async fn fetch_workflow(
    client: &GitHubClient,
    repo: &RepoId,
    workflow: WorkflowDto,
    since: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<FetchOutcome> {
    let mut pager = client.run_pager(repo, workflow.id, since)?;
    let mut outcome = FetchOutcome::default();

    loop {
        let page = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                outcome.partial = true;
                break;
            }
            page = pager.next_page() => page,
        };

        let runs = match page {
            Ok(Some(runs)) => runs,
            Ok(None) => break,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let at = pager.cursor().map_or_else(String::new, |url| format!(" at {url}"));
                warn!("Stopped fetching runs of '{}'{at}: {e}", workflow.name);
                outcome.partial = true;
                break;
            }
        };

        outcome.invalid_runs += runs.invalid;
        for run in runs.entries {
            // The page that crosses the window start also holds older runs.
            if run.created().is_some_and(|created| created < since) {
                continue;
            }

            let jobs = match run.id {
                Some(run_id) => {
                    let (jobs, complete) = fetch_jobs(client, repo, run_id, cancel).await?;
                    outcome.partial |= !complete;
                    jobs
                }
                None => Decoded::default(),
            };

            outcome.records.push(RawRecord {
                workflow: workflow.name.clone(),
                run,
                jobs: jobs.entries,
                invalid_jobs: jobs.invalid,
            });
        }
    }

    if let Some((listed, total)) = pager.truncated() {
        warn!(
            "The API listed only {listed} of {total} runs of '{}' in the window, older runs are missing",
            workflow.name
        );
        outcome.partial = true;
    }

    info!(
        "Workflow '{}': {} runs fetched",
        workflow.name,
        outcome.records.len()
    );
    Ok(outcome)
}

/// Jobs of one run, and whether they were fetched completely.
async fn fetch_jobs(
    client: &GitHubClient,
    repo: &RepoId,
    run_id: u64,
    cancel: &CancellationToken,
) -> Result<(Decoded<RawJob>, bool)> {
    let fetched = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok((Decoded::default(), false)),
        fetched = client.fetch_run_jobs(repo, run_id) => fetched,
    };

    match fetched {
        Ok(jobs) => Ok((jobs, true)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Jobs of run {run_id} unavailable: {e}");
            Ok((Decoded::default(), false))
        }
    }
}

fn record_start(record: &RawRecord) -> Option<DateTime<Utc>> {
    parse_timestamp(record.run.run_started_at.as_deref()).or_else(|| record.run.created())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::github::client::FetchCounters;
    use crate::providers::github::rate_limit::RateLimitBudget;
    use crate::providers::github::retry::RetryPolicy;
    use chrono::Duration;
    use mockito::{Matcher, Mock, ServerGuard};
    use std::sync::Arc;

    const WORKFLOWS_PATH: &str = "/repos/acme/widgets/actions/workflows";

    fn client(base_url: &str) -> GitHubClient {
        GitHubClient::new(
            base_url,
            None,
            Arc::new(RateLimitBudget::new()),
            RetryPolicy {
                max_attempts: 2,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(1),
                multiplier: 1,
            },
        )
        .unwrap()
    }

    fn repo() -> RepoId {
        "acme/widgets".parse().unwrap()
    }

    async fn mock_workflows(server: &mut ServerGuard) -> Mock {
        server
            .mock("GET", WORKFLOWS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"workflows": [
                    {"id": 7, "name": "CI", "path": ".github/workflows/ci.yml"},
                    {"id": 8, "name": "Release", "path": ".github/workflows/release.yml"}
                ]}"#,
            )
            .create_async()
            .await
    }

    fn run_json(id: u64, created: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "status": "completed",
            "conclusion": "success",
            "created_at": created.to_rfc3339(),
            "run_started_at": created.to_rfc3339(),
            "updated_at": (created + Duration::minutes(5)).to_rfc3339(),
        })
    }

    async fn mock_runs(server: &mut ServerGuard, workflow_id: u64, runs: &[serde_json::Value]) -> Mock {
        server
            .mock("GET", format!("{WORKFLOWS_PATH}/{workflow_id}/runs").as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(serde_json::json!({ "workflow_runs": runs }).to_string())
            .create_async()
            .await
    }

    async fn mock_jobs(server: &mut ServerGuard, run_id: u64) -> Mock {
        server
            .mock("GET", format!("/repos/acme/widgets/actions/runs/{run_id}/jobs").as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"jobs": [{"id": 1, "name": "build", "status": "completed", "conclusion": "success"}]}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_missing_repository_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", WORKFLOWS_PATH)
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;

        let client = client(&server.url());
        let result = fetch_history(
            &client,
            &repo(),
            None,
            Utc::now() - Duration::days(30),
            4,
            &CancellationToken::new(),
        )
        .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(CIPulseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_workflow_filter_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _workflows = mock_workflows(&mut server).await;

        let client = client(&server.url());
        let result = fetch_history(
            &client,
            &repo(),
            Some("nightly.yml"),
            Utc::now() - Duration::days(30),
            4,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(CIPulseError::NotFound(m)) if m.contains("nightly.yml")));
    }

    #[tokio::test]
    async fn test_fetches_all_workflows_newest_first() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();
        let since = now - Duration::days(7);

        let _workflows = mock_workflows(&mut server).await;
        let _ci = mock_runs(
            &mut server,
            7,
            &[
                run_json(1, now - Duration::hours(1)),
                run_json(2, now - Duration::hours(30)),
                run_json(3, now - Duration::days(9)),
            ],
        )
        .await;
        let _release = mock_runs(&mut server, 8, &[run_json(4, now - Duration::hours(5))]).await;
        let mut jobs = Vec::new();
        for run_id in [1, 2, 4] {
            jobs.push(mock_jobs(&mut server, run_id).await);
        }

        let client = client(&server.url());
        let outcome = fetch_history(&client, &repo(), None, since, 2, &CancellationToken::new())
            .await
            .unwrap();

        for mock in &jobs {
            mock.assert_async().await;
        }
        assert!(!outcome.partial);
        let ids: Vec<_> = outcome.records.iter().filter_map(|r| r.run.id).collect();
        assert_eq!(ids, vec![1, 4, 2]);
        assert_eq!(outcome.records[1].workflow, "Release");
        assert!(outcome.records.iter().all(|r| r.jobs.len() == 1));
    }

    #[tokio::test]
    async fn test_filter_limits_fetch_to_one_workflow() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();

        let _workflows = mock_workflows(&mut server).await;
        let ci = mock_runs(&mut server, 7, &[]).await;
        let release = server
            .mock("GET", format!("{WORKFLOWS_PATH}/8/runs").as_str())
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = client(&server.url());
        let outcome = fetch_history(
            &client,
            &repo(),
            Some("ci.yml"),
            now - Duration::days(7),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        ci.assert_async().await;
        release.assert_async().await;
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_outcome_partial() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();

        let _workflows = mock_workflows(&mut server).await;
        let _ci = mock_runs(&mut server, 7, &[run_json(1, now - Duration::hours(1))]).await;
        let _jobs = mock_jobs(&mut server, 1).await;
        let broken = server
            .mock("GET", format!("{WORKFLOWS_PATH}/8/runs").as_str())
            .match_query(Matcher::Any)
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let client = client(&server.url());
        let outcome = fetch_history(
            &client,
            &repo(),
            None,
            now - Duration::days(7),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        broken.assert_async().await;
        assert!(outcome.partial);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_job_failure_keeps_run_without_jobs() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();

        let _workflows = mock_workflows(&mut server).await;
        let _ci = mock_runs(&mut server, 7, &[run_json(1, now - Duration::hours(1))]).await;
        let _release = mock_runs(&mut server, 8, &[]).await;
        let _jobs = server
            .mock("GET", "/repos/acme/widgets/actions/runs/1/jobs")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let client = client(&server.url());
        let outcome = fetch_history(
            &client,
            &repo(),
            None,
            now - Duration::days(7),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.partial);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].jobs.is_empty());
    }

    #[tokio::test]
    async fn test_mistyped_run_is_counted_instead_of_aborting() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();

        let _workflows = mock_workflows(&mut server).await;
        let mut broken = run_json(2, now - Duration::hours(2));
        broken["id"] = serde_json::json!("not-a-number");
        let _ci = mock_runs(&mut server, 7, &[run_json(1, now - Duration::hours(1)), broken]).await;
        let _release = mock_runs(&mut server, 8, &[]).await;
        let _jobs = server
            .mock("GET", "/repos/acme/widgets/actions/runs/1/jobs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"jobs": [
                    {"id": 1, "name": "build", "status": "completed", "conclusion": "success"},
                    {"id": 2, "name": ["not", "a", "name"]}
                ]}"#,
            )
            .create_async()
            .await;

        let client = client(&server.url());
        let outcome = fetch_history(
            &client,
            &repo(),
            None,
            now - Duration::days(7),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!outcome.partial);
        assert_eq!(outcome.invalid_runs, 1);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].run.id, Some(1));
        assert_eq!(outcome.records[0].jobs.len(), 1);
        assert_eq!(outcome.records[0].invalid_jobs, 1);
    }

    #[tokio::test]
    async fn test_listing_cut_short_by_api_marks_outcome_partial() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();

        let _workflows = mock_workflows(&mut server).await;
        let _ci = server
            .mock("GET", format!("{WORKFLOWS_PATH}/7/runs").as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "total_count": 1200,
                    "workflow_runs": [run_json(1, now - Duration::hours(1))],
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _release = mock_runs(&mut server, 8, &[]).await;
        let _jobs = mock_jobs(&mut server, 1).await;

        let client = client(&server.url());
        let outcome = fetch_history(
            &client,
            &repo(),
            None,
            now - Duration::days(60),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.partial);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_workers_share_one_quota() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();
        let reset = now.timestamp() + 1;

        // One request left: the two workflow workers cannot both spend it.
        let _workflows = server
            .mock("GET", WORKFLOWS_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("x-ratelimit-remaining", "1")
            .with_header("x-ratelimit-reset", &reset.to_string())
            .with_body(
                r#"{"workflows": [
                    {"id": 7, "name": "CI", "path": ".github/workflows/ci.yml"},
                    {"id": 8, "name": "Release", "path": ".github/workflows/release.yml"}
                ]}"#,
            )
            .create_async()
            .await;
        let _ci = mock_runs(&mut server, 7, &[run_json(1, now - Duration::hours(1))]).await;
        let _release = mock_runs(&mut server, 8, &[run_json(2, now - Duration::hours(2))]).await;
        let _jobs_1 = mock_jobs(&mut server, 1).await;
        let _jobs_2 = mock_jobs(&mut server, 2).await;

        let client = client(&server.url());
        let outcome = fetch_history(
            &client,
            &repo(),
            None,
            now - Duration::days(7),
            2,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!outcome.partial);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(FetchCounters::get(&client.counters.rate_limit_waits), 1);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_returns_partial_outcome() {
        let server = mockito::Server::new_async().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = client(&server.url());
        let outcome = fetch_history(
            &client,
            &repo(),
            None,
            Utc::now() - Duration::days(7),
            4,
            &cancel,
        )
        .await
        .unwrap();

        assert!(outcome.partial);
        assert!(outcome.records.is_empty());
        assert_eq!(FetchCounters::get(&client.counters.pages), 0);
    }
}
