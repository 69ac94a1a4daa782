//! Rate-limited, retrying lookup client.
//!
//! The pacer enforces one process-wide minimum interval between remote
//! requests, independent of caller concurrency. It is an explicitly owned,
//! injectable resource (tests pass [`NoopPacer`]), not a module-level
//! singleton. On 429 the interval is adaptively widened and restored after
//! a quiet minute.
//!
//! Every fetch attempt, success or failure, is logged with source, request,
//! attempt number, and elapsed time so that any later match (or non-match)
//! can be reconstructed from the log.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::cache::LookupCache;
use crate::sources::{
    LookupError, LookupErrorKind, LookupRequest, MetadataSource, Payload,
};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Base delay for the exponential retry backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound for a single backoff sleep.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Paces outgoing requests. The single blocking point on the fetch path.
pub trait Pacer: Send + Sync {
    fn acquire(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Feedback from a 429 response.
    fn on_rate_limited(&self) {}
}

/// Pacer that never waits, for tests and offline runs.
pub struct NoopPacer;

impl Pacer for NoopPacer {
    fn acquire(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Process-wide minimum-interval pacer with adaptive slowdown.
///
/// On 429 the interval is doubled (capped at 16x); after 60 s without a 429
/// the base interval is restored.
pub struct IntervalPacer {
    limiter: ArcSwap<DirectLimiter>,
    base_period: Duration,
    current_factor: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl IntervalPacer {
    /// Create a pacer with the given interval between requests.
    /// The interval must be nonzero; use [`build_pacer`] when it may be.
    pub fn new(period: Duration) -> Self {
        let quota = Quota::with_period(period).expect("pacer interval must be > 0");
        Self {
            limiter: ArcSwap::from(Arc::new(DirectLimiter::direct(quota))),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= 60))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            let quota = Quota::with_period(self.base_period).expect("base period valid");
            self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
        }
    }

    #[cfg(test)]
    fn factor(&self) -> u32 {
        self.current_factor.load(Ordering::SeqCst)
    }
}

impl Pacer for IntervalPacer {
    fn acquire(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {
            self.try_decay();
            let limiter = self.limiter.load();
            limiter.until_ready().await;
        })
    }

    fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| Some((f * 2).min(16)));

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor)
            && let Some(quota) = Quota::with_period(scaled)
        {
            self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
        }
    }
}

/// Build the pacer for a configured interval (zero disables pacing).
pub fn build_pacer(interval: Duration) -> Arc<dyn Pacer> {
    if interval.is_zero() {
        Arc::new(NoopPacer)
    } else {
        Arc::new(IntervalPacer::new(interval))
    }
}

/// Fetches bibliographic metadata from remote sources through the cache,
/// the pacer, and a bounded retry loop.
pub struct LookupClient {
    sources: Vec<Arc<dyn MetadataSource>>,
    http: reqwest::Client,
    pacer: Arc<dyn Pacer>,
    cache: Arc<LookupCache>,
    max_retries: u32,
    timeout: Duration,
}

impl LookupClient {
    pub fn new(
        sources: Vec<Arc<dyn MetadataSource>>,
        pacer: Arc<dyn Pacer>,
        cache: Arc<LookupCache>,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            sources,
            http,
            pacer,
            cache,
            max_retries,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }

    /// Fetch metadata for a request. A fresh cache entry short-circuits the
    /// network; otherwise the first source supporting the request shape is
    /// queried with pacing and retry.
    pub async fn fetch(&self, request: &LookupRequest) -> Result<Payload, LookupError> {
        let key = request.cache_key();
        if let Some(hit) = self.cache.get(&key)
            && hit.is_fresh(self.cache.ttl())
        {
            tracing::debug!(%request, age_secs = hit.age.as_secs(), "lookup served from cache");
            return Ok(hit.payload);
        }

        let source = self
            .sources
            .iter()
            .find(|s| s.supports(request))
            .ok_or_else(|| {
                LookupError::permanent(
                    LookupErrorKind::Unsupported,
                    format!("no source handles {request}"),
                )
            })?;

        let mut attempt: u32 = 0;
        loop {
            self.pacer.acquire().await;

            let start = Instant::now();
            let result = source.fetch(request, &self.http, self.timeout).await;
            let elapsed = start.elapsed();

            match result {
                Ok(payload) => {
                    tracing::info!(
                        source = source.name(),
                        %request,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "lookup succeeded"
                    );
                    self.cache.insert(&key, &payload);
                    return Ok(payload);
                }
                Err(err) => {
                    tracing::warn!(
                        source = source.name(),
                        %request,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        retryable = err.retryable,
                        "lookup attempt failed"
                    );

                    if err.kind == LookupErrorKind::RateLimited {
                        self.pacer.on_rate_limited();
                    }
                    if !err.retryable || attempt >= self.max_retries {
                        return Err(err);
                    }

                    let backoff = backoff_delay(attempt, err.retry_after);
                    tracing::info!(
                        source = source.name(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Exponential backoff with jitter; a server-provided `Retry-After` takes
/// precedence. Jitter affects timing only, never output.
fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d.min(BACKOFF_CAP);
    }
    let exp = BACKOFF_BASE
        .checked_mul(1u32 << attempt.min(6))
        .unwrap_or(BACKOFF_CAP)
        .min(BACKOFF_CAP);
    let jitter_ms = fastrand::u64(0..=exp.as_millis() as u64 / 2);
    (exp + Duration::from_millis(jitter_ms)).min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_TTL;
    use crate::identifier::normalize;
    use crate::sources::mock::{MockResponse, MockSource};

    fn payload(title: &str) -> Payload {
        Payload {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn client_with(source: Arc<MockSource>, max_retries: u32) -> LookupClient {
        LookupClient::new(
            vec![source],
            Arc::new(NoopPacer),
            Arc::new(LookupCache::new(DEFAULT_TTL)),
            max_retries,
            Duration::from_secs(5),
        )
    }

    fn doi_request() -> LookupRequest {
        LookupRequest::ById(normalize("10.1000/xyz123"))
    }

    #[tokio::test]
    async fn success_first_try() {
        let source = Arc::new(MockSource::new("TestDB", MockResponse::Found(payload("A"))));
        let client = client_with(source.clone(), 3);

        let result = client.fetch(&doi_request()).await.unwrap();
        assert_eq!(result.title.as_deref(), Some("A"));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_thrice_then_succeeds() {
        let source = Arc::new(MockSource::with_sequence(
            "TestDB",
            vec![
                MockResponse::RateLimited { retry_after: Some(Duration::from_secs(1)) },
                MockResponse::RateLimited { retry_after: None },
                MockResponse::RateLimited { retry_after: None },
                MockResponse::Found(payload("Eventually")),
            ],
        ));
        let client = client_with(source.clone(), 3);

        let result = client.fetch(&doi_request()).await.unwrap();
        assert_eq!(result.title.as_deref(), Some("Eventually"));
        // three failed attempts plus the success
        assert_eq!(source.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_returns_error() {
        let source = Arc::new(MockSource::new("TestDB", MockResponse::Timeout));
        let client = client_with(source.clone(), 2);

        let err = client.fetch(&doi_request()).await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::Timeout);
        // initial attempt + two retries
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test]
    async fn permanent_error_fails_fast() {
        let source = Arc::new(MockSource::new(
            "TestDB",
            MockResponse::Permanent("bad payload".into()),
        ));
        let client = client_with(source.clone(), 3);

        let err = client.fetch(&doi_request()).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let source = Arc::new(MockSource::new("TestDB", MockResponse::NotFound));
        let client = client_with(source.clone(), 3);

        let err = client.fetch(&doi_request()).await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::NotFound);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn fresh_cache_entry_short_circuits_network() {
        let source = Arc::new(MockSource::new("TestDB", MockResponse::NotFound));
        let cache = Arc::new(LookupCache::new(DEFAULT_TTL));
        let request = doi_request();
        cache.insert(&request.cache_key(), &payload("Cached"));

        let client = LookupClient::new(
            vec![source.clone()],
            Arc::new(NoopPacer),
            cache,
            3,
            Duration::from_secs(5),
        );

        let result = client.fetch(&request).await.unwrap();
        assert_eq!(result.title.as_deref(), Some("Cached"));
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn successful_fetch_populates_cache() {
        let source = Arc::new(MockSource::new("TestDB", MockResponse::Found(payload("A"))));
        let client = client_with(source.clone(), 0);
        let request = doi_request();

        client.fetch(&request).await.unwrap();
        let hit = client.cache().get(&request.cache_key()).unwrap();
        assert_eq!(hit.payload.title.as_deref(), Some("A"));

        // second fetch is served from cache
        client.fetch(&request).await.unwrap();
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn unsupported_request_is_permanent() {
        let client = LookupClient::new(
            vec![],
            Arc::new(NoopPacer),
            Arc::new(LookupCache::new(DEFAULT_TTL)),
            3,
            Duration::from_secs(5),
        );
        let err = client.fetch(&doi_request()).await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::Unsupported);
        assert!(!err.retryable);
    }

    // ── pacer ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn noop_pacer_acquires_instantly() {
        NoopPacer.acquire().await;
    }

    #[tokio::test]
    async fn interval_pacer_first_acquire_is_instant() {
        let pacer = IntervalPacer::new(Duration::from_millis(100));
        pacer.acquire().await;
    }

    #[test]
    fn interval_pacer_slowdown_doubles_and_caps() {
        let pacer = IntervalPacer::new(Duration::from_millis(100));
        assert_eq!(pacer.factor(), 1);
        pacer.on_rate_limited();
        assert_eq!(pacer.factor(), 2);
        pacer.on_rate_limited();
        assert_eq!(pacer.factor(), 4);
        for _ in 0..10 {
            pacer.on_rate_limited();
        }
        assert_eq!(pacer.factor(), 16);
    }

    #[tokio::test]
    async fn interval_pacer_decays_after_quiet_minute() {
        let pacer = IntervalPacer::new(Duration::from_millis(100));
        pacer.on_rate_limited();
        assert_eq!(pacer.factor(), 2);

        {
            let mut last = pacer.last_429.lock().unwrap();
            *last = Some(Instant::now() - Duration::from_secs(61));
        }

        pacer.acquire().await;
        assert_eq!(pacer.factor(), 1);
    }

    #[test]
    fn build_pacer_zero_interval_is_noop() {
        // must not panic on a zero interval
        let _ = build_pacer(Duration::ZERO);
        let _ = build_pacer(Duration::from_millis(250));
    }

    #[test]
    fn backoff_prefers_retry_after() {
        assert_eq!(
            backoff_delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        let early = backoff_delay(0, None);
        assert!(early >= BACKOFF_BASE);
        let late = backoff_delay(20, None);
        assert!(late <= BACKOFF_CAP);
    }
}
