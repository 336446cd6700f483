//! Per-source rate limiting with adaptive governor instances.
//!
//! Each source call waits for its governor permit via `until_ready()`, which
//! spaces requests at the configured rate. On 429, the governor is slowed
//! and the call is retried once after honoring `Retry-After`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Error type for external source calls, distinguishing rate limiting from other errors.
///
/// "Not found" is never an error: sources return `Ok(None)` or an empty list.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Server returned 429 Too Many Requests.
    RateLimited { retry_after: Option<Duration> },
    /// Transport, HTTP status or decoding failure.
    Other(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::RateLimited {
                retry_after: Some(d),
            } => write!(f, "Rate limited (429), retry after {:.1}s", d.as_secs_f64()),
            SourceError::RateLimited { retry_after: None } => write!(f, "Rate limited (429)"),
            SourceError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<String> for SourceError {
    fn from(s: String) -> Self {
        SourceError::Other(s)
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Other(e.to_string())
    }
}

/// Per-source rate limiter with adaptive rate adjustment via ArcSwap.
///
/// When a 429 is received, the governor is atomically swapped to a slower rate.
/// After a cooldown period (60s) with no 429s, the original rate is restored.
pub struct AdaptiveLimiter {
    limiter: ArcSwap<DirectLimiter>,
    /// Base period between allowed requests.
    base_period: Duration,
    /// Current slowdown factor (1 = normal, 2 = half rate, etc.).
    current_factor: AtomicU32,
    /// Timestamp of the last 429 response.
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl AdaptiveLimiter {
    /// Create a new limiter with the given period between requests.
    ///
    /// A zero period is clamped to one millisecond.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            limiter: ArcSwap::from(Arc::new(direct_limiter(period))),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Create a limiter allowing `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        let ms = 1000 / n.max(1) as u64;
        Self::new(Duration::from_millis(ms))
    }

    /// Wait until the rate limiter allows a request.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Called when a 429 is received. Doubles the slowdown factor and swaps the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        // Double factor, cap at 16x slowdown
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(16))
            });

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor) {
            self.limiter.store(Arc::new(direct_limiter(scaled)));
        }
    }

    /// If 60s have passed since the last 429, restore the original rate.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= 60))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            self.limiter
                .store(Arc::new(direct_limiter(self.base_period)));
        }
    }
}

fn direct_limiter(period: Duration) -> DirectLimiter {
    // `period` is never zero (clamped in `AdaptiveLimiter::new`)
    let quota = Quota::with_period(period).unwrap_or_else(|| Quota::per_second(std::num::NonZeroU32::MIN));
    DirectLimiter::direct(quota)
}

/// Collection of per-source rate limiters.
pub struct RateLimiters {
    limiters: HashMap<&'static str, AdaptiveLimiter>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl RateLimiters {
    /// Build rate limiters based on whether a Crossref mailto / NCBI API key are configured.
    pub fn new(has_crossref_mailto: bool, has_ncbi_api_key: bool) -> Self {
        let mut limiters = HashMap::new();

        // Crossref: 1/s anonymous, 3/s in the polite pool
        let crossref_rate = if has_crossref_mailto { 3 } else { 1 };
        limiters.insert("Crossref", AdaptiveLimiter::per_second(crossref_rate));

        // bioRxiv API: not documented, conservative 2/s
        limiters.insert("bioRxiv", AdaptiveLimiter::per_second(2));

        // PubMed E-utilities: 3/s without key, 10/s with key
        let pubmed_rate = if has_ncbi_api_key { 10 } else { 3 };
        limiters.insert("PubMed", AdaptiveLimiter::per_second(pubmed_rate));

        Self { limiters }
    }

    /// Get the rate limiter for a given source, if one exists.
    pub fn get(&self, source_name: &str) -> Option<&AdaptiveLimiter> {
        self.limiters.get(source_name)
    }
}

/// Check if an HTTP response is a 429 and extract Retry-After if present.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SourceError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(SourceError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date: use a conservative fallback
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Run a source call under its governor.
///
/// 1. Acquires the per-source governor (waits if needed)
/// 2. Runs `call`
/// 3. On 429: slows the governor, sleeps for `Retry-After` (capped at
///    `timeout`) and retries once
/// 4. On other errors or success: returns immediately
pub async fn call_with_rate_limit<T, F, Fut>(
    source_name: &str,
    rate_limiters: &RateLimiters,
    timeout: Duration,
    mut call: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let limiter = rate_limiters.get(source_name);

    if let Some(lim) = limiter {
        lim.acquire().await;
    }

    match call().await {
        Err(SourceError::RateLimited { retry_after }) => {
            if let Some(lim) = limiter {
                lim.on_rate_limited();
            }

            let wait = retry_after.unwrap_or(Duration::from_secs(2)).min(timeout);
            tracing::info!(
                source = source_name,
                wait_secs = wait.as_secs_f64(),
                "429 rate limited, waiting then retrying"
            );
            tokio::time::sleep(wait).await;

            if let Some(lim) = limiter {
                lim.acquire().await;
            }

            // Single retry; a second 429 is returned to the caller
            call().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // ── parse_retry_after ──────────────────────────────────────────────

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parse_http_date_gmt() {
        let val = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(parse_retry_after(val), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parse_garbage_none() {
        assert_eq!(parse_retry_after("xyz"), None);
    }

    // ── check_rate_limit_response ──────────────────────────────────────

    #[test]
    fn ok_on_200() {
        let http_resp = http::Response::builder().status(200).body("").unwrap();
        let resp = reqwest::Response::from(http_resp);
        assert!(check_rate_limit_response(&resp).is_ok());
    }

    #[test]
    fn rate_limited_429_with_retry_after() {
        let http_resp = http::Response::builder()
            .status(429)
            .header("retry-after", "10")
            .body("")
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        match check_rate_limit_response(&resp).unwrap_err() {
            SourceError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(10)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    // ── AdaptiveLimiter ────────────────────────────────────────────────

    #[test]
    fn on_rate_limited_doubles_and_caps() {
        let limiter = AdaptiveLimiter::per_second(10);
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 1);
        limiter.on_rate_limited();
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 2);
        for _ in 0..10 {
            limiter.on_rate_limited();
        }
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn decay_restores_after_60s() {
        let limiter = AdaptiveLimiter::per_second(10);
        limiter.on_rate_limited();
        limiter.on_rate_limited();
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 4);

        {
            let mut last = limiter.last_429.lock().unwrap();
            *last = Some(Instant::now() - Duration::from_secs(61));
        }

        limiter.acquire().await;
        assert_eq!(limiter.current_factor.load(Ordering::SeqCst), 1);
    }

    // ── RateLimiters ───────────────────────────────────────────────────

    #[test]
    fn default_has_expected_sources() {
        let limiters = RateLimiters::default();
        for name in ["Crossref", "bioRxiv", "PubMed"] {
            assert!(limiters.get(name).is_some(), "missing limiter for {name}");
        }
        assert!(limiters.get("FakeDB").is_none());
    }

    #[test]
    fn pubmed_rate_varies_with_api_key() {
        let without = RateLimiters::new(false, false);
        let with = RateLimiters::new(false, true);
        assert!(
            with.get("PubMed").unwrap().base_period < without.get("PubMed").unwrap().base_period
        );
    }

    // ── call_with_rate_limit ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn success_first_try() {
        let calls = AtomicUsize::new(0);
        let limiters = RateLimiters::default();
        let result = call_with_rate_limit("PubMed", &limiters, Duration::from_secs(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SourceError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_retries_once() {
        let calls = AtomicUsize::new(0);
        let limiters = RateLimiters::default();
        let result: Result<(), _> =
            call_with_rate_limit("PubMed", &limiters, Duration::from_secs(10), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SourceError::RateLimited {
                        retry_after: Some(Duration::from_secs(5)),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(SourceError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            limiters
                .get("PubMed")
                .unwrap()
                .current_factor
                .load(Ordering::SeqCst),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn other_error_no_retry() {
        let calls = AtomicUsize::new(0);
        let limiters = RateLimiters::default();
        let result: Result<(), _> =
            call_with_rate_limit("Unlimited", &limiters, Duration::from_secs(10), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Other("connection refused".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
