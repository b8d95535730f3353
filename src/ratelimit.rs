//! Adaptive per-API rate limiting and transient-error retry.
//!
//! One `RateLimiter` instance exists per API (GitLab, GitHub) and is shared
//! by every client touching that API, including across parallel batch
//! migrations, so concurrency does not multiply the effective request rate.
//!
//! The limiter mirrors the last-seen response headers exactly. As usage
//! crosses the throttle threshold the inter-request delay rises smoothly to
//! a cap; when the window is exhausted the next acquire sleeps until reset.

use crate::error::{ErrorCategory, MigrationError};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Minimum interval between requests to the same API.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot of an API's rate-limit window.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    /// Pending Retry-After from a 429, seconds.
    pub retry_after: Option<u64>,
    /// Adaptive delay applied before each request, seconds.
    pub throttle_delay: f64,
}

impl RateLimitState {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Fraction of the window consumed (0.0 to 1.0).
    pub fn usage(&self) -> f64 {
        match (self.limit, self.remaining) {
            (Some(limit), Some(remaining)) if limit > 0 => {
                (limit - remaining.min(limit)) as f64 / limit as f64
            }
            _ => 0.0,
        }
    }

    pub fn seconds_until_reset(&self) -> Option<f64> {
        self.reset_at.map(|reset| {
            let delta = reset - Utc::now();
            (delta.num_milliseconds() as f64 / 1000.0).max(0.0)
        })
    }
}

struct LimiterInner {
    state: RateLimitState,
    last_request: Option<Instant>,
    request_count: u64,
}

/// Adaptive rate limiter driven by response headers.
pub struct RateLimiter {
    name: &'static str,
    /// Usage fraction at which throttling starts.
    threshold: f64,
    /// Throttle delay cap, seconds.
    max_delay: f64,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    pub fn new(name: &'static str, default_limit: u64) -> Self {
        Self::with_throttle(name, default_limit, 0.8, 2.0)
    }

    pub fn with_throttle(
        name: &'static str,
        default_limit: u64,
        threshold: f64,
        max_delay: f64,
    ) -> Self {
        Self {
            name,
            threshold,
            max_delay,
            inner: Mutex::new(LimiterInner {
                state: RateLimitState {
                    limit: Some(default_limit),
                    remaining: Some(default_limit),
                    ..Default::default()
                },
                last_request: None,
                request_count: 0,
            }),
        }
    }

    /// GitLab defaults: 2000 requests/minute for authenticated users.
    pub fn gitlab() -> Arc<Self> {
        Arc::new(Self::new("gitlab", 2000))
    }

    /// GitHub defaults: 5000 requests/hour for authenticated users.
    pub fn github() -> Arc<Self> {
        Arc::new(Self::new("github", 5000))
    }

    /// Block until a request may be issued.
    ///
    /// Sleeps (in order of precedence): until window reset when exhausted,
    /// for a pending Retry-After, then for the adaptive throttle delay or
    /// the minimum inter-request interval, whichever is longer.
    pub async fn acquire(&self) {
        // Decide the sleep while holding the lock, sleep without it.
        let wait = {
            let mut inner = self.inner.lock().await;

            if inner.state.is_exhausted() {
                if let Some(secs) = inner.state.seconds_until_reset() {
                    if secs > 0.0 {
                        tracing::warn!(
                            api = self.name,
                            wait_secs = secs as u64,
                            "Rate limit exhausted, waiting until reset"
                        );
                        // Assume a fresh window after the wait.
                        inner.state.remaining = inner.state.limit;
                        inner.last_request = Some(Instant::now());
                        inner.request_count += 1;
                        Some(Duration::from_secs_f64(secs + 1.0))
                    } else {
                        None
                    }
                } else {
                    None
                }
            } else if let Some(retry_after) = inner.state.retry_after.take() {
                tracing::warn!(
                    api = self.name,
                    retry_after,
                    "Retry-After received, backing off"
                );
                inner.last_request = Some(Instant::now());
                inner.request_count += 1;
                Some(Duration::from_secs(retry_after))
            } else {
                let throttle = Duration::from_secs_f64(inner.state.throttle_delay);
                let since_last = inner
                    .last_request
                    .map(|t| t.elapsed())
                    .unwrap_or(MIN_INTERVAL);
                let spacing = MIN_INTERVAL.saturating_sub(since_last);
                let wait = throttle.max(spacing);
                inner.last_request = Some(Instant::now());
                inner.request_count += 1;
                (wait > Duration::ZERO).then_some(wait)
            }
        };

        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }

    /// Overwrite state from response headers. Accepts both the GitLab
    /// (`RateLimit-*`) and GitHub (`X-RateLimit-*`) conventions plus
    /// `Retry-After`.
    pub async fn update_from_headers(&self, headers: &HashMap<String, String>) {
        let get = |key: &str| -> Option<u64> {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| v.trim().parse().ok())
        };

        let mut inner = self.inner.lock().await;

        if let Some(limit) = get("RateLimit-Limit").or_else(|| get("X-RateLimit-Limit")) {
            inner.state.limit = Some(limit);
        }
        if let Some(remaining) = get("RateLimit-Remaining").or_else(|| get("X-RateLimit-Remaining"))
        {
            inner.state.remaining = Some(remaining);
        }
        if let Some(reset) = get("RateLimit-Reset").or_else(|| get("X-RateLimit-Reset")) {
            inner.state.reset_at = Utc.timestamp_opt(reset as i64, 0).single();
        }
        if let Some(retry_after) = get("Retry-After") {
            inner.state.retry_after = Some(retry_after);
        }

        // Recompute the adaptive delay from the fresh window view.
        let usage = inner.state.usage();
        inner.state.throttle_delay = if usage >= self.threshold {
            let excess = (usage - self.threshold) / (1.0 - self.threshold);
            let delay = (excess * self.max_delay).clamp(0.0, self.max_delay);
            tracing::warn!(
                api = self.name,
                usage = format!("{:.1}%", usage * 100.0),
                delay_secs = format!("{delay:.2}"),
                "Approaching rate limit, throttling"
            );
            delay
        } else {
            0.0
        };
    }

    /// Current state snapshot.
    pub async fn state(&self) -> RateLimitState {
        self.inner.lock().await.state.clone()
    }

    /// Requests issued through this limiter.
    pub async fn request_count(&self) -> u64 {
        self.inner.lock().await.request_count
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Bounded retry with exponential backoff for transient failures.
///
/// 429s honor their Retry-After; server/network/timeout errors back off
/// `2^attempt` seconds capped at 60. Auth, permission, not-found and
/// validation errors fail immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_cap_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_cap_secs: 60,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based) for `error`.
    /// `None` means the error is not retryable.
    pub fn backoff_for(&self, error: &MigrationError, attempt: u32) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        if error.category == ErrorCategory::RateLimit {
            return Some(Duration::from_secs(error.retry_after.unwrap_or(60)));
        }
        let secs = 2u64.saturating_pow(attempt).min(self.backoff_cap_secs);
        Some(Duration::from_secs(secs))
    }

    /// Run `op`, retrying transient failures up to the budget.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let backoff = match self.backoff_for(&err, attempt) {
                        Some(backoff) if attempt < self.max_retries => backoff,
                        _ => return Err(err),
                    };
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        category = %err.category,
                        backoff_secs = backoff.as_secs(),
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify_status, Forge};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn headers(pairs: &[(&str, String)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_update_from_gitlab_headers() {
        let limiter = RateLimiter::new("gitlab", 2000);
        limiter
            .update_from_headers(&headers(&[
                ("RateLimit-Limit", "2000".into()),
                ("RateLimit-Remaining", "1999".into()),
                ("RateLimit-Reset", "1893456000".into()),
            ]))
            .await;

        let state = limiter.state().await;
        assert_eq!(state.limit, Some(2000));
        assert_eq!(state.remaining, Some(1999));
        assert!(state.reset_at.is_some());
        assert_eq!(state.throttle_delay, 0.0);
    }

    #[tokio::test]
    async fn test_update_from_github_headers_case_insensitive() {
        let limiter = RateLimiter::new("github", 5000);
        limiter
            .update_from_headers(&headers(&[
                ("x-ratelimit-limit", "5000".into()),
                ("x-ratelimit-remaining", "4321".into()),
            ]))
            .await;

        let state = limiter.state().await;
        assert_eq!(state.remaining, Some(4321));
    }

    #[tokio::test]
    async fn test_throttle_delay_rises_with_usage() {
        let limiter = RateLimiter::with_throttle("test", 100, 0.8, 2.0);

        // 50% usage: below threshold, no throttle.
        limiter
            .update_from_headers(&headers(&[
                ("RateLimit-Limit", "100".into()),
                ("RateLimit-Remaining", "50".into()),
            ]))
            .await;
        assert_eq!(limiter.state().await.throttle_delay, 0.0);

        // 90% usage: halfway through the throttle band → half the cap.
        limiter
            .update_from_headers(&headers(&[
                ("RateLimit-Limit", "100".into()),
                ("RateLimit-Remaining", "10".into()),
            ]))
            .await;
        let delay = limiter.state().await.throttle_delay;
        assert!((delay - 1.0).abs() < 1e-9, "expected 1.0, got {delay}");

        // 100% usage: delay capped.
        limiter
            .update_from_headers(&headers(&[
                ("RateLimit-Limit", "100".into()),
                ("RateLimit-Remaining", "0".into()),
            ]))
            .await;
        assert!((limiter.state().await.throttle_delay - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_until_reset_when_exhausted() {
        let limiter = RateLimiter::new("test", 100);
        let reset_at = Utc::now() + chrono::Duration::seconds(5);
        limiter
            .update_from_headers(&headers(&[
                ("RateLimit-Limit", "100".into()),
                ("RateLimit-Remaining", "0".into()),
                ("RateLimit-Reset", reset_at.timestamp().to_string()),
            ]))
            .await;

        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        // Slept at least the 5s to reset plus the 1s buffer.
        assert!(start.elapsed() >= Duration::from_secs(5));

        // Window assumed fresh after the wait.
        let state = limiter.state().await;
        assert_eq!(state.remaining, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_honors_retry_after_once() {
        let limiter = RateLimiter::new("test", 100);
        limiter
            .update_from_headers(&headers(&[("Retry-After", "3".into())]))
            .await;

        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(3));

        // Cleared after honoring it: the next acquire is cheap.
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_not_retryable_for_permanent_errors() {
        let policy = RetryPolicy::default();
        let auth = classify_status(Forge::GitLab, 401, "x", None, None);
        assert!(policy.backoff_for(&auth, 0).is_none());
        let validation = classify_status(Forge::GitHub, 422, "x", None, None);
        assert!(policy.backoff_for(&validation, 0).is_none());
    }

    #[test]
    fn test_backoff_exponential_and_capped() {
        let policy = RetryPolicy::default();
        let server = classify_status(Forge::GitHub, 500, "x", None, None);
        assert_eq!(policy.backoff_for(&server, 0), Some(Duration::from_secs(1)));
        assert_eq!(policy.backoff_for(&server, 1), Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff_for(&server, 2), Some(Duration::from_secs(4)));
        assert_eq!(
            policy.backoff_for(&server, 10),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_backoff_rate_limit_uses_retry_after() {
        let policy = RetryPolicy::default();
        let rl = classify_status(Forge::GitLab, 429, "x", Some(7), None);
        assert_eq!(policy.backoff_for(&rl, 0), Some(Duration::from_secs(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(classify_status(Forge::GitHub, 503, "unavailable", None, None))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_fails_fast_on_permanent() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(classify_status(Forge::GitHub, 404, "missing", None, None)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
