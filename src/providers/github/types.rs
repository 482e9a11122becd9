use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CIPulseError;

/// Repository identifier in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoId {
    type Err = CIPulseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };

        match value.trim().split_once('/') {
            Some((owner, name)) if valid(owner) && valid(name) => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(CIPulseError::Config(format!(
                "Invalid repository '{value}', expected 'owner/name'"
            ))),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDto {
    pub id: u64,
    pub name: String,
    pub path: String,
}

impl WorkflowDto {
    /// A filter names a workflow by display name, file name, or path.
    pub fn matches(&self, filter: &str) -> bool {
        let file_name = self.path.rsplit('/').next().unwrap_or(&self.path);
        self.name.eq_ignore_ascii_case(filter) || self.path == filter || file_name == filter
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkflowsPage {
    #[serde(default)]
    pub workflows: Vec<WorkflowDto>,
}

/// Workflow run as returned by the API. Every field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkflowRun {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub head_branch: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub run_started_at: Option<String>,
}

impl RawWorkflowRun {
    /// Runs are listed newest first by creation time.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.created_at.as_deref())
    }
}

/// Runs are kept as loose JSON so one malformed run cannot fail the page.
#[derive(Debug, Deserialize)]
pub struct WorkflowRunsPage {
    /// Runs matching the query, which may exceed what the API will list.
    pub total_count: Option<u64>,
    #[serde(default)]
    pub workflow_runs: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJob {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    #[serde(default)]
    pub steps: Vec<RawStep>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStep {
    pub name: Option<String>,
    pub conclusion: Option<String>,
    pub number: Option<u32>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobsPage {
    #[serde(default)]
    pub jobs: Vec<Value>,
}

/// Entries of a listing that decoded, and how many did not.
#[derive(Debug)]
pub struct Decoded<T> {
    pub entries: Vec<T>,
    pub invalid: usize,
}

impl<T> Default for Decoded<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            invalid: 0,
        }
    }
}

/// Decode each listed entry on its own, skipping and counting those that do not fit `T`.
pub fn decode_entries<T: DeserializeOwned>(values: Vec<Value>, kind: &str) -> Decoded<T> {
    let mut decoded = Decoded {
        entries: Vec::with_capacity(values.len()),
        invalid: 0,
    };

    for value in values {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value(value) {
            Ok(entry) => decoded.entries.push(entry),
            Err(e) => {
                warn!("Skipping invalid {kind} (id {id}): {e}");
                decoded.invalid += 1;
            }
        }
    }

    decoded
}

/// One fetched run with its jobs, tagged with the workflow it was listed under.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub workflow: String,
    pub run: RawWorkflowRun,
    pub jobs: Vec<RawJob>,
    /// Listed jobs of the run that could not be decoded.
    pub invalid_jobs: usize,
}

pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_repo_id_parses_owner_and_name() {
        let repo: RepoId = "rust-lang/rust".parse().unwrap();
        assert_eq!(repo.owner, "rust-lang");
        assert_eq!(repo.name, "rust");
        assert_eq!(repo.to_string(), "rust-lang/rust");
    }

    #[test]
    fn test_repo_id_rejects_bad_input() {
        for input in ["rust", "/rust", "rust-lang/", "a/b/c", "own er/name", "owner/na?me"] {
            assert!(input.parse::<RepoId>().is_err(), "accepted {input}");
        }
    }

    #[test]
    fn test_workflow_filter_matches_name_file_or_path() {
        let workflow = WorkflowDto {
            id: 7,
            name: "CI".to_string(),
            path: ".github/workflows/ci.yml".to_string(),
        };

        assert!(workflow.matches("ci"));
        assert!(workflow.matches("ci.yml"));
        assert!(workflow.matches(".github/workflows/ci.yml"));
        assert!(!workflow.matches("release.yml"));
    }

    #[test]
    fn test_raw_run_tolerates_missing_fields() {
        let run: RawWorkflowRun = serde_json::from_str(r#"{"id": 5, "extra": [1, 2]}"#).unwrap();
        assert_eq!(run.id, Some(5));
        assert!(run.status.is_none());
        assert!(run.created().is_none());
    }

    #[test]
    fn test_decode_entries_skips_mistyped_entries() {
        let values = vec![
            serde_json::json!({"id": 1, "status": "completed"}),
            serde_json::json!({"id": "not-a-number", "status": "completed"}),
            serde_json::json!({"id": 3, "created_at": 17}),
        ];

        let decoded: Decoded<RawWorkflowRun> = decode_entries(values, "run");

        let ids: Vec<_> = decoded.entries.iter().filter_map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(decoded.invalid, 2);
    }

    #[test]
    fn test_runs_page_keeps_total_count() {
        let page: WorkflowRunsPage = serde_json::from_str(
            r#"{"total_count": 1500, "workflow_runs": [{"id": 1}, {"id": "x"}]}"#,
        )
        .unwrap();

        assert_eq!(page.total_count, Some(1500));
        assert_eq!(page.workflow_runs.len(), 2);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp(Some("2024-05-01T10:00:00Z")),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp(Some("2024-05-01T12:00:00+02:00")),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(Some("yesterday")), None);
        assert_eq!(parse_timestamp(None), None);
    }
}
