//! Mock metadata source for tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{LookupError, LookupRequest, MetadataSource, Payload};

/// A configurable mock response for [`MockSource`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    Found(Payload),
    NotFound,
    RateLimited { retry_after: Option<Duration> },
    Timeout,
    ServerError(u16),
    Permanent(String),
}

/// A hand-rolled mock implementing [`MetadataSource`] for tests.
///
/// Supports a fixed response or a sequence (one per call, last repeated when
/// exhausted), optional per-call latency, and call counting.
pub struct MockSource {
    name: &'static str,
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockSource {
    /// A mock that always returns `response`.
    pub fn new(name: &'static str, response: MockResponse) -> Self {
        Self {
            name,
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// A mock that returns responses in order, repeating the last one.
    pub fn with_sequence(name: &'static str, mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        let fallback = responses.last().cloned().unwrap();
        responses.reverse();
        Self {
            name,
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `fetch()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        let mut seq = self.responses.lock().unwrap();
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl MetadataSource for MockSource {
    fn name(&self) -> &str {
        self.name
    }

    fn supports(&self, _request: &LookupRequest) -> bool {
        true
    }

    fn fetch<'a>(
        &'a self,
        request: &'a LookupRequest,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, LookupError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockResponse::Found(payload) => Ok(payload),
                MockResponse::NotFound => {
                    Err(LookupError::not_found(format!("mock: no match for {request}")))
                }
                MockResponse::RateLimited { retry_after } => {
                    Err(LookupError::rate_limited(retry_after))
                }
                MockResponse::Timeout => Err(LookupError::transient(
                    super::LookupErrorKind::Timeout,
                    "mock: timed out",
                )),
                MockResponse::ServerError(status) => {
                    Err(LookupError::from_status(status, None))
                }
                MockResponse::Permanent(msg) => Err(LookupError::permanent(
                    super::LookupErrorKind::MalformedPayload,
                    msg,
                )),
            }
        })
    }
}
