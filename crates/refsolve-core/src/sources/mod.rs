//! Metadata source adapters.
//!
//! Every remote source speaks its own shape (CSL-JSON, Atom XML, ...);
//! adapters convert at this boundary so the resolver only ever sees one
//! canonical [`Payload`].

pub mod crossref;
pub mod mock;
pub mod preprint;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Contributor;
use crate::identifier::Identifier;
use crate::matching::normalize_title;

/// Canonical bibliographic metadata fetched from a remote source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub title: Option<String>,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
}

/// What to fetch: a canonical identifier or a free-text query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupRequest {
    ById(Identifier),
    ByQuery(String),
}

impl LookupRequest {
    /// Stable cache key: the canonical identifier, or the normalized query
    /// text. Never the raw occurrence text.
    pub fn cache_key(&self) -> String {
        match self {
            LookupRequest::ById(id) => id.canonical.clone(),
            LookupRequest::ByQuery(query) => format!("q:{}", normalize_title(query)),
        }
    }
}

impl std::fmt::Display for LookupRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupRequest::ById(id) => write!(f, "{}", id.canonical),
            LookupRequest::ByQuery(query) => write!(f, "query \"{}\"", query),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorKind {
    Timeout,
    RateLimited,
    /// Non-success HTTP status other than 429.
    Http(u16),
    /// Connection-level failure.
    Network,
    /// The source answered but the body could not be interpreted.
    MalformedPayload,
    /// The source answered definitively: no such record.
    NotFound,
    /// No configured source handles this request shape.
    Unsupported,
}

/// Failure of a single lookup. `retryable` drives the client's retry loop:
/// transient kinds are retried with backoff, permanent kinds fail fast.
#[derive(Debug, Clone)]
pub struct LookupError {
    pub kind: LookupErrorKind,
    pub retryable: bool,
    pub message: String,
    /// Server-requested wait before the next attempt (from `Retry-After`).
    pub retry_after: Option<Duration>,
}

impl LookupError {
    pub fn transient(kind: LookupErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: true,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(kind: LookupErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: false,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            kind: LookupErrorKind::RateLimited,
            retryable: true,
            message: "rate limited (429)".into(),
            retry_after,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::permanent(LookupErrorKind::NotFound, message)
    }

    /// Classify a reqwest transport error.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transient(LookupErrorKind::Timeout, err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::transient(LookupErrorKind::Network, err.to_string())
        } else {
            Self::permanent(LookupErrorKind::MalformedPayload, err.to_string())
        }
    }

    /// Classify a non-success HTTP status: 5xx transient, 429 rate-limited,
    /// other 4xx permanent.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::rate_limited(retry_after),
            404 | 410 => Self::not_found(format!("HTTP {}", status)),
            s if s >= 500 => Self::transient(LookupErrorKind::Http(s), format!("HTTP {}", s)),
            s => Self::permanent(LookupErrorKind::Http(s), format!("HTTP {}", s)),
        }
    }
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, self.retry_after) {
            (LookupErrorKind::RateLimited, Some(d)) => {
                write!(f, "rate limited (429), retry after {:.1}s", d.as_secs_f64())
            }
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for LookupError {}

/// A remote metadata source. Implementations convert their wire format into
/// the canonical [`Payload`] and classify failures as [`LookupError`].
pub trait MetadataSource: Send + Sync {
    /// Canonical source name (e.g. "CrossRef"), used in logs and reports.
    fn name(&self) -> &str;

    /// Whether this source can serve the given request shape.
    fn supports(&self, request: &LookupRequest) -> bool;

    fn fetch<'a>(
        &'a self,
        request: &'a LookupRequest,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, LookupError>> + Send + 'a>>;
}

/// Parse a `Retry-After` header value (seconds, or a conservative fallback
/// for HTTP-date forms).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Check a response for 429 and extract `Retry-After` if present.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), LookupError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(LookupError::rate_limited(retry_after))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::normalize;

    #[test]
    fn cache_key_uses_canonical_identifier() {
        let req = LookupRequest::ById(normalize("https://doi.org/10.1/ABC"));
        assert_eq!(req.cache_key(), "doi:10.1/abc");
    }

    #[test]
    fn cache_key_normalizes_query_text() {
        let a = LookupRequest::ByQuery("The  Craft of Use!".into());
        let b = LookupRequest::ByQuery("the craft OF use".into());
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn parse_retry_after_integer() {
        assert_eq!(parse_retry_after("10"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn parse_retry_after_http_date_fallback() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn status_classification() {
        assert!(LookupError::from_status(503, None).retryable);
        assert!(LookupError::from_status(429, None).retryable);
        assert!(!LookupError::from_status(400, None).retryable);
        assert_eq!(
            LookupError::from_status(404, None).kind,
            LookupErrorKind::NotFound
        );
    }
}
