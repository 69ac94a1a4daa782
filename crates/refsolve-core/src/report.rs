//! Run-level reporting: per-failure entries and aggregate statistics.

use serde::Serialize;

use crate::{FailureReason, MatchTier, ResolutionOutcome};
use crate::pipeline::EmittedItem;

/// One unresolved occurrence in the failure report.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub position: usize,
    pub raw: String,
    pub reason: FailureReason,
    pub detail: String,
}

/// The structured failure report, one entry per failed occurrence, in
/// document order. Produced on every run, even a fully successful one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureReport {
    pub entries: Vec<FailureEntry>,
}

impl FailureReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub exact: usize,
    pub normalized: usize,
    pub fuzzy: usize,
    pub not_found: usize,
    pub ambiguous: usize,
    pub external_error: usize,
    pub malformed: usize,
}

impl RunStats {
    pub fn tally(items: &[EmittedItem]) -> Self {
        let mut stats = Self {
            total: items.len(),
            ..Self::default()
        };
        for item in items {
            match &item.outcome {
                ResolutionOutcome::Resolved(record) => match record.tier {
                    MatchTier::Exact => stats.exact += 1,
                    MatchTier::Normalized => stats.normalized += 1,
                    MatchTier::Fuzzy => stats.fuzzy += 1,
                    MatchTier::Unresolved => {}
                },
                ResolutionOutcome::Failed { reason, .. } => match reason {
                    FailureReason::NotFound => stats.not_found += 1,
                    FailureReason::Ambiguous => stats.ambiguous += 1,
                    FailureReason::ExternalError => stats.external_error += 1,
                    FailureReason::MalformedInput => stats.malformed += 1,
                },
            }
        }
        stats
    }

    pub fn resolved(&self) -> usize {
        self.exact + self.normalized + self.fuzzy
    }

    pub fn failed(&self) -> usize {
        self.not_found + self.ambiguous + self.external_error + self.malformed
    }
}
