use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::auth::Token;
use crate::error::{CIPulseError, Result};
use crate::providers::github::rate_limit::{rate_limited_until, Quota, RateLimitBudget};
use crate::providers::github::retry::RetryPolicy;
use crate::providers::github::types::RepoId;

const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

/// Request bookkeeping shared by all workers using one client.
#[derive(Debug, Default)]
pub struct FetchCounters {
    pub pages: AtomicUsize,
    pub retries: AtomicUsize,
    pub transient_failures: AtomicUsize,
    pub rate_limit_waits: AtomicUsize,
}

impl FetchCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

enum Attempt<T> {
    Done(T, Option<Url>),
    RateLimited,
}

pub struct GitHubClient {
    pub client: Client,
    pub api_url: Url,
    pub token: Option<Token>,
    pub budget: Arc<RateLimitBudget>,
    pub retry: RetryPolicy,
    pub counters: FetchCounters,
}

impl GitHubClient {
    pub fn new(
        base_url: &str,
        token: Option<Token>,
        budget: Arc<RateLimitBudget>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent("CIPulse/0.1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| CIPulseError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut api_url = Url::parse(base_url)
            .map_err(|e| CIPulseError::Config(format!("Invalid API base URL: {e}")))?;
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        Ok(Self {
            client,
            api_url,
            token,
            budget,
            retry,
            counters: FetchCounters::default(),
        })
    }

    pub fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    pub fn repo_url(&self, repo: &RepoId, path: &str) -> Result<Url> {
        self.api_url
            .join(&format!("repos/{}/{}/{path}", repo.owner, repo.name))
            .map_err(|e| CIPulseError::Config(format!("Invalid repository URL: {e}")))
    }

    /// GET one page, waiting out rate limits and retrying transient failures.
    ///
    /// Returns the decoded body and the next-page cursor, if any.
    pub async fn get_page<T: DeserializeOwned>(&self, url: &Url) -> Result<(T, Option<Url>)> {
        let mut backoff = self.retry.backoff();

        loop {
            if self.budget.acquire().await {
                FetchCounters::bump(&self.counters.rate_limit_waits);
            }

            let error = match self.send_once(url).await {
                Ok(Attempt::Done(body, next)) => {
                    FetchCounters::bump(&self.counters.pages);
                    return Ok((body, next));
                }
                Ok(Attempt::RateLimited) => continue,
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            match backoff.next_delay() {
                Some(delay) => {
                    FetchCounters::bump(&self.counters.retries);
                    warn!(
                        "Request to {url} failed ({error}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    FetchCounters::bump(&self.counters.transient_failures);
                    return Err(CIPulseError::TransientFetch(format!(
                        "giving up on {url} after {} attempts: {error}",
                        backoff.failures()
                    )));
                }
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(&self, url: &Url) -> Result<Attempt<T>> {
        debug!("GET {url}");

        let request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/vnd.github+json")
            .header(API_VERSION_HEADER, API_VERSION);
        let response = self.auth_request(request).send().await?;

        let status = response.status();
        let quota = Quota::from_headers(response.headers());
        self.budget.observe(quota).await;

        if status.is_success() {
            let next = next_page_url(response.headers());
            // A cut-off or garbled body on a 2xx is worth another attempt.
            let bytes = response.bytes().await.map_err(|e| {
                CIPulseError::TransientFetch(format!("reading body of {}: {e}", url.path()))
            })?;
            let body = serde_json::from_slice::<T>(&bytes).map_err(|e| {
                CIPulseError::TransientFetch(format!("undecodable body from {}: {e}", url.path()))
            })?;
            return Ok(Attempt::Done(body, next));
        }

        if let Some(until) = rate_limited_until(status, response.headers(), &quota, Utc::now()) {
            warn!("Rate limited by the API ({status}), pausing until {until}");
            self.budget.exhaust(until).await;
            return Ok(Attempt::RateLimited);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, url, &body))
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

fn classify_failure(status: StatusCode, url: &Url, body: &str) -> CIPulseError {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    let detail = format!("{status} from {}: {message}", url.path());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CIPulseError::Authorization(detail),
        StatusCode::NOT_FOUND => CIPulseError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT => CIPulseError::TransientFetch(detail),
        s if s.is_server_error() => CIPulseError::TransientFetch(detail),
        _ => CIPulseError::Api(detail),
    }
}

/// The `rel="next"` target of a `Link` header.
fn next_page_url(headers: &HeaderMap) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|link| {
            let (target, params) = link.split_once(';')?;
            let is_next = params
                .split(';')
                .any(|p| matches!(p.trim(), r#"rel="next""# | "rel=next"));
            let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
            is_next.then(|| Url::parse(target).ok()).flatten()
        })
}
