use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod client;
pub mod config_file;
pub mod contributors;
pub mod extract;
pub mod identifier;
pub mod library;
pub mod matching;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod sanitize;
pub mod sources;

// Re-export for convenience
pub use cache::{DEFAULT_TTL, LookupCache};
pub use client::{IntervalPacer, LookupClient, NoopPacer, Pacer};
pub use identifier::{Identifier, IdentifierKind, normalize};
pub use library::{LibraryEntry, LibrarySnapshot};
pub use pipeline::{EmittedItem, RunOutput, run_pipeline};
pub use report::{FailureReport, RunStats};
pub use resolver::Resolver;
pub use sanitize::Grammar;
pub use sources::{LookupError, LookupErrorKind, LookupRequest, Payload};

/// A located citation reference inside source text.
///
/// Produced during extraction and immutable afterwards. `position` is the
/// byte offset of the span in the source document; the emitted artifact is
/// ordered by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationOccurrence {
    pub raw: String,
    /// Identifier-like token found inline (URL, DOI, preprint id), if any.
    pub inline_identifier: Option<String>,
    pub position: usize,
}

/// A contributor to a bibliographic work.
///
/// Organizational contributors carry a single name field and must never be
/// collapsed into a family-only personal name when emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Contributor {
    Person { given: String, family: String },
    Organization { name: String },
}

impl Contributor {
    pub fn person(given: impl Into<String>, family: impl Into<String>) -> Self {
        Contributor::Person {
            given: given.into(),
            family: family.into(),
        }
    }

    pub fn organization(name: impl Into<String>) -> Self {
        Contributor::Organization { name: name.into() }
    }

    /// Surname for matching purposes (organizations use the full name).
    pub fn surname(&self) -> &str {
        match self {
            Contributor::Person { family, .. } => family,
            Contributor::Organization { name } => name,
        }
    }
}

/// Confidence tier of a resolved record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Normalized,
    Fuzzy,
    Unresolved,
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchTier::Exact => write!(f, "exact"),
            MatchTier::Normalized => write!(f, "normalized"),
            MatchTier::Fuzzy => write!(f, "fuzzy"),
            MatchTier::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Resolved bibliographic metadata, read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibliographicRecord {
    /// Stable key, unique within an emission run.
    pub key: String,
    pub title: String,
    pub contributors: Vec<Contributor>,
    pub container: Option<String>,
    pub date: Option<String>,
    pub identifiers: Vec<Identifier>,
    pub tier: MatchTier,
}

/// Why an occurrence could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No match at any tier.
    NotFound,
    /// Two or more fuzzy candidates scored within the ambiguity margin.
    /// Terminal: never auto-resolved, requires human review.
    Ambiguous,
    /// Remote lookup failed (transient exhausted retries, or permanent).
    ExternalError,
    /// The occurrence text yields neither an identifier nor a searchable fragment.
    MalformedInput,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "not found"),
            FailureReason::Ambiguous => write!(f, "ambiguous"),
            FailureReason::ExternalError => write!(f, "external error"),
            FailureReason::MalformedInput => write!(f, "malformed input"),
        }
    }
}

/// Per-occurrence result of resolution. Never silently dropped: the pipeline
/// aggregates every outcome into the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved(BibliographicRecord),
    Failed { reason: FailureReason, detail: String },
}

impl ResolutionOutcome {
    pub fn failed(reason: FailureReason, detail: impl Into<String>) -> Self {
        ResolutionOutcome::Failed {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionOutcome::Resolved(_))
    }

    pub fn tier(&self) -> MatchTier {
        match self {
            ResolutionOutcome::Resolved(record) => record.tier,
            ResolutionOutcome::Failed { .. } => MatchTier::Unresolved,
        }
    }

    pub fn record(&self) -> Option<&BibliographicRecord> {
        match self {
            ResolutionOutcome::Resolved(record) => Some(record),
            ResolutionOutcome::Failed { .. } => None,
        }
    }
}

/// Progress events emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Resolving {
        index: usize,
        total: usize,
        excerpt: String,
    },
    Resolved {
        index: usize,
        total: usize,
        tier: MatchTier,
    },
    Failed {
        index: usize,
        total: usize,
        reason: FailureReason,
    },
    RetryWait {
        source: String,
        attempt: u32,
        backoff: Duration,
    },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("cache store error: {0}")]
    Cache(String),
    #[error("library snapshot error: {0}")]
    Library(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a resolution run.
///
/// Consumed, not owned: the CLI assembles this from defaults, config files,
/// environment, and flags. [`Config::validate`] is the fatal-before-run gate
/// for programmer/operator errors.
#[derive(Debug, Clone)]
pub struct Config {
    /// Persistent cache location; `None` keeps the cache in memory only.
    pub cache_path: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    /// Minimum interval between remote requests, process-wide.
    pub rate_limit_interval_ms: u64,
    /// Retry ceiling for transient lookup failures.
    pub max_retries: u32,
    /// Timeout per fetch attempt, not per occurrence.
    pub fetch_timeout_secs: u64,
    /// Minimum combined score for a fuzzy match to be accepted.
    pub fuzzy_threshold: f64,
    /// Runner-up within this margin of the best score makes the outcome ambiguous.
    pub fuzzy_margin: f64,
    /// Weight of title similarity in the combined fuzzy score (rest is author overlap).
    pub title_weight: f64,
    pub num_workers: usize,
    /// Allow the resolver to fetch remote metadata for bare identifiers.
    pub augment_from_remote: bool,
    /// Turn accumulated failures into a run-level error after the report.
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_path: None,
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            rate_limit_interval_ms: 1000,
            max_retries: 3,
            fetch_timeout_secs: 10,
            fuzzy_threshold: 0.82,
            fuzzy_margin: 0.03,
            title_weight: 0.75,
            num_workers: 4,
            augment_from_remote: true,
            strict: false,
        }
    }
}

impl Config {
    /// Reject configurations the run cannot sensibly start with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "fuzzy_threshold must be within [0, 1], got {}",
                self.fuzzy_threshold
            )));
        }
        if self.fuzzy_margin < 0.0 || self.fuzzy_margin >= 1.0 {
            return Err(CoreError::InvalidConfig(format!(
                "fuzzy_margin must be within [0, 1), got {}",
                self.fuzzy_margin
            )));
        }
        if !(0.0..=1.0).contains(&self.title_weight) {
            return Err(CoreError::InvalidConfig(format!(
                "title_weight must be within [0, 1], got {}",
                self.title_weight
            )));
        }
        if self.num_workers == 0 {
            return Err(CoreError::InvalidConfig(
                "num_workers must be at least 1".into(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "fetch_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_interval_ms)
    }
}
