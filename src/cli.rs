use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{self, TOKEN_ENV};
use crate::config::{AnalysisConfig, CacheStepRegistry, Thresholds};
use crate::models::TimeWindow;
use crate::providers::github::{
    AnalysisRequest, BaselineSource, GitHubProvider, RepoId, RetryPolicy,
};
use crate::report::{OutputFormat, Report};
use crate::snapshot::BaselineSnapshot;

/// Exit status when the analysis itself could not be completed.
pub const EXIT_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "cipulse")]
#[command(author, version, about = "CI pipeline performance trends and regressions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output file path (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty print JSON output
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze GitHub Actions workflow history
    ///
    /// The API token is read from the GITHUB_TOKEN environment variable.
    Github(GithubArgs),
}

#[derive(Args)]
struct GithubArgs {
    /// GitHub API URL (for GitHub Enterprise, e.g. "https://ghe.example.com/api/v3")
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    api_url: String,

    /// Repository (e.g., "owner/name")
    #[arg(short, long)]
    repo: RepoId,

    /// Workflow name, file name or path to analyze (defaults to all workflows)
    #[arg(short, long)]
    workflow: Option<String>,

    /// Length of the current window in days
    #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
    days: u32,

    /// How far back the baseline window ends, in days (defaults to --days)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    baseline_offset_days: Option<u32>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Success-rate drop (percentage points) that raises a warning
    #[arg(long, default_value_t = 5.0)]
    warn_success_drop: f64,

    /// Success-rate drop (percentage points) that is critical
    #[arg(long, default_value_t = 15.0)]
    critical_success_drop: f64,

    /// p90 duration growth (percent) that raises a warning
    #[arg(long, default_value_t = 30.0)]
    warn_p90_growth: f64,

    /// p90 duration growth (percent) that is critical
    #[arg(long, default_value_t = 75.0)]
    critical_p90_growth: f64,

    /// Completed runs both windows need before they are compared
    #[arg(long, default_value_t = 5)]
    min_samples: usize,

    /// Workflows fetched concurrently
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// File of cache step patterns, one regular expression per line
    #[arg(long)]
    cache_patterns: Option<PathBuf>,

    /// Compare against a saved snapshot instead of fetching the baseline window
    #[arg(long, conflicts_with = "baseline_offset_days")]
    baseline_snapshot: Option<PathBuf>,

    /// Save the current window's aggregates as a snapshot
    #[arg(long)]
    save_snapshot: Option<PathBuf>,

    /// Report in-progress runs as a pending count
    #[arg(long, default_value_t = false)]
    include_live: bool,

    /// Stop fetching after this many seconds and report what was fetched
    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl GithubArgs {
    fn analysis_config(&self) -> Result<AnalysisConfig> {
        let cache_steps = match &self.cache_patterns {
            Some(path) => CacheStepRegistry::load(path).with_context(|| {
                format!("Failed to load cache step patterns from {}", path.display())
            })?,
            None => CacheStepRegistry::default(),
        };

        let config = AnalysisConfig {
            thresholds: Thresholds {
                warning_success_drop_pts: self.warn_success_drop,
                critical_success_drop_pts: self.critical_success_drop,
                warning_p90_growth_pct: self.warn_p90_growth,
                critical_p90_growth_pct: self.critical_p90_growth,
                min_samples: self.min_samples,
            },
            concurrency: self.concurrency,
            include_live: self.include_live,
            cache_steps,
        };
        config.validate()?;
        Ok(config)
    }

    fn request(&self) -> Result<AnalysisRequest> {
        let current = TimeWindow::ending_at(Utc::now(), self.days);

        let baseline = match &self.baseline_snapshot {
            Some(path) => BaselineSource::Snapshot(
                BaselineSnapshot::load(path, &self.repo.to_string()).with_context(|| {
                    format!("Failed to load baseline snapshot {}", path.display())
                })?,
            ),
            None => BaselineSource::Fetch(
                current.shifted_back(self.baseline_offset_days.unwrap_or(self.days)),
            ),
        };

        Ok(AnalysisRequest {
            workflow: self.workflow.clone(),
            current,
            baseline,
        })
    }
}

impl Cli {
    /// Run the command and map the outcome to a process exit status.
    pub async fn run(&self) -> u8 {
        match self.execute().await {
            Ok(status) => status,
            Err(e) => {
                eprintln!("Error: {e:#}");
                EXIT_FAILURE
            }
        }
    }

    /// Returns 1 when the report holds a critical finding, 0 otherwise.
    pub async fn execute(&self) -> Result<u8> {
        match &self.command {
            Commands::Github(args) => {
                info!("Collecting GitHub insights for repository: {}", args.repo);

                let config = args.analysis_config()?;
                let request = args.request()?;

                let token = auth::token_from_env();
                if token.is_none() {
                    warn!("{TOKEN_ENV} is not set, only public repositories can be read");
                }
                let provider = GitHubProvider::new(
                    &args.api_url,
                    args.repo.clone(),
                    token,
                    RetryPolicy::default(),
                )?;

                let cancel = CancellationToken::new();
                let watcher = watch_for_cancellation(cancel.clone(), args.deadline_secs);
                let report = provider.collect_insights(&request, &config, &cancel).await;
                watcher.abort();
                let report = report?;

                if let Some(path) = &args.save_snapshot {
                    BaselineSnapshot::from_report(&report).save(path)?;
                }

                self.write_report(&report, args.format)?;
                Ok(u8::from(report.has_critical()))
            }
        }
    }

    fn write_report(&self, report: &Report, format: OutputFormat) -> Result<()> {
        let rendered = report.render(format, self.pretty)?;

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, rendered)?;
            info!("Report written to: {}", output_path.display());
        } else {
            println!("{rendered}");
        }

        Ok(())
    }
}

/// Cancel `token` on Ctrl-C or once the deadline passes.
fn watch_for_cancellation(token: CancellationToken, deadline_secs: Option<u64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match deadline_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, reporting the runs fetched so far"),
            () = deadline => warn!("Deadline reached, reporting the runs fetched so far"),
        }
        token.cancel();
    })
}
