use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tokio::sync::Mutex;

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Extra wait after the advertised reset so the first request lands in the new window.
const RESET_GRACE: Duration = Duration::from_millis(250);

/// Used when the API says the quota is gone but not when it comes back.
const FALLBACK_WAIT_SECS: i64 = 60;

/// Request quota as last reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quota {
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl Quota {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };

        Self {
            remaining: number(REMAINING_HEADER).and_then(|v| u32::try_from(v).ok()),
            reset_at: number(RESET_HEADER).and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// When a refused request should be retried, if the refusal was a rate limit.
///
/// GitHub answers an exhausted quota with `403` or `429`; a `retry-after`
/// header marks a secondary limit.
pub fn rate_limited_until(
    status: StatusCode,
    headers: &HeaderMap,
    quota: &Quota,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }

    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());

    if let Some(secs) = retry_after {
        return Some(now + chrono::Duration::seconds(secs.max(0)));
    }

    if quota.is_exhausted() {
        return Some(
            quota
                .reset_at
                .unwrap_or_else(|| now + chrono::Duration::seconds(FALLBACK_WAIT_SECS)),
        );
    }

    (status == StatusCode::TOO_MANY_REQUESTS)
        .then(|| now + chrono::Duration::seconds(FALLBACK_WAIT_SECS))
}

/// Request quota shared by every fetch worker of one analysis.
///
/// All reads and writes go through one lock. A worker that finds the quota
/// exhausted sleeps while holding it, so no other worker can spend requests
/// until the reset time has passed.
#[derive(Debug, Default)]
pub struct RateLimitBudget {
    quota: Mutex<Quota>,
}

impl RateLimitBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one request slot. Returns whether the caller had to wait for a reset.
    pub async fn acquire(&self) -> bool {
        let mut quota = self.quota.lock().await;
        let mut waited = false;

        if quota.is_exhausted() {
            match quota.reset_at {
                Some(reset_at) => {
                    let wait = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    info!(
                        "Rate limit exhausted, waiting {}s until reset at {reset_at}",
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait + RESET_GRACE).await;
                    waited = true;
                }
                None => warn!("Rate limit exhausted without a reset time, continuing"),
            }
            // Unknown until the next response reports it.
            *quota = Quota::default();
        }

        if let Some(remaining) = quota.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }

        waited
    }

    /// Apply the quota reported by a response.
    pub async fn observe(&self, observed: Quota) {
        if observed.remaining.is_none() {
            return;
        }

        let mut quota = self.quota.lock().await;
        let same_window = quota.reset_at.is_some() && quota.reset_at == observed.reset_at;

        // Concurrent responses may arrive out of order within one window.
        if same_window {
            quota.remaining = quota.remaining.min(observed.remaining).or(observed.remaining);
        } else if observed.reset_at >= quota.reset_at || quota.remaining.is_none() {
            *quota = observed;
        }
    }

    /// Mark the quota spent until `reset_at`.
    pub async fn exhaust(&self, reset_at: DateTime<Utc>) {
        let mut quota = self.quota.lock().await;
        quota.remaining = Some(0);
        quota.reset_at = Some(quota.reset_at.map_or(reset_at, |r| r.max(reset_at)));
    }

    pub async fn current(&self) -> Quota {
        *self.quota.lock().await
    }
}
