//! Pipeline orchestration: extraction → resolution → sanitization → emission.
//!
//! A bounded worker pool resolves independent occurrences in parallel; the
//! emitted artifact presents records in original document order regardless
//! of completion order. A single failure never aborts the run: every
//! outcome lands in the report, and strict mode is applied by the caller
//! only after the report exists. Cancellation degrades in-flight
//! occurrences to external errors without affecting the rest.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::report::{FailureEntry, FailureReport, RunStats};
use crate::resolver::Resolver;
use crate::library::LibrarySnapshot;
use crate::sanitize::{Grammar, sanitize_record};
use crate::{CitationOccurrence, FailureReason, ProgressEvent, ResolutionOutcome};

/// One emitted (occurrence, outcome) pair.
#[derive(Debug, Clone, Serialize)]
pub struct EmittedItem {
    pub occurrence: CitationOccurrence,
    pub outcome: ResolutionOutcome,
}

/// Everything a run produces: ordered items, the failure report, and stats.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub items: Vec<EmittedItem>,
    pub report: FailureReport,
    pub stats: RunStats,
}

impl RunOutput {
    /// Whether strict mode should turn this run into a hard failure.
    pub fn has_failures(&self) -> bool {
        self.stats.failed() > 0
    }
}

struct Job {
    occurrence: CitationOccurrence,
    index: usize,
    result_tx: oneshot::Sender<(usize, ResolutionOutcome)>,
}

/// Resolve all occurrences and emit sanitized records in document order.
pub async fn run_pipeline(
    occurrences: Vec<CitationOccurrence>,
    library: Arc<LibrarySnapshot>,
    resolver: Arc<Resolver>,
    grammar: Grammar,
    num_workers: usize,
    progress: impl Fn(ProgressEvent) + Send + Sync + 'static,
    cancel: CancellationToken,
) -> RunOutput {
    let total = occurrences.len();
    let progress = Arc::new(progress);

    let (job_tx, job_rx) = async_channel::unbounded::<Job>();

    let mut worker_handles = Vec::with_capacity(num_workers.max(1));
    for _ in 0..num_workers.max(1) {
        worker_handles.push(tokio::spawn(worker_loop(
            job_rx.clone(),
            library.clone(),
            resolver.clone(),
            progress.clone(),
            cancel.clone(),
            total,
        )));
    }
    drop(job_rx);

    let mut receivers = Vec::with_capacity(total);
    for (index, occurrence) in occurrences.iter().enumerate() {
        let (result_tx, result_rx) = oneshot::channel();
        let _ = job_tx
            .send(Job {
                occurrence: occurrence.clone(),
                index,
                result_tx,
            })
            .await;
        receivers.push(result_rx);
    }
    job_tx.close();

    let mut outcomes: Vec<Option<ResolutionOutcome>> = vec![None; total];
    for rx in receivers {
        if let Ok((index, outcome)) = rx.await {
            outcomes[index] = Some(outcome);
        }
    }

    for handle in worker_handles {
        let _ = handle.await;
    }

    // Pair outcomes with their occurrences; a worker dropped mid-cancel
    // still yields an explicit failure, never a silent gap.
    let mut items: Vec<EmittedItem> = occurrences
        .into_iter()
        .zip(outcomes)
        .map(|(occurrence, outcome)| EmittedItem {
            occurrence,
            outcome: outcome.unwrap_or_else(|| {
                ResolutionOutcome::failed(FailureReason::ExternalError, "resolution cancelled")
            }),
        })
        .collect();

    // Emission order is document order: sort by position after resolution.
    items.sort_by_key(|item| item.occurrence.position);

    finalize(items, grammar)
}

async fn worker_loop(
    job_rx: async_channel::Receiver<Job>,
    library: Arc<LibrarySnapshot>,
    resolver: Arc<Resolver>,
    progress: Arc<impl Fn(ProgressEvent) + Send + Sync>,
    cancel: CancellationToken,
    total: usize,
) {
    let emit = |event: ProgressEvent| (progress.as_ref())(event);

    while let Ok(job) = job_rx.recv().await {
        let outcome = if cancel.is_cancelled() {
            ResolutionOutcome::failed(FailureReason::ExternalError, "resolution cancelled")
        } else {
            emit(ProgressEvent::Resolving {
                index: job.index,
                total,
                excerpt: excerpt(&job.occurrence.raw),
            });

            tokio::select! {
                outcome = resolver.resolve(&job.occurrence, &library) => outcome,
                _ = cancel.cancelled() => ResolutionOutcome::failed(
                    FailureReason::ExternalError,
                    "resolution cancelled",
                ),
            }
        };

        match &outcome {
            ResolutionOutcome::Resolved(record) => emit(ProgressEvent::Resolved {
                index: job.index,
                total,
                tier: record.tier,
            }),
            ResolutionOutcome::Failed { reason, .. } => emit(ProgressEvent::Failed {
                index: job.index,
                total,
                reason: *reason,
            }),
        }

        let _ = job.result_tx.send((job.index, outcome));
    }
}

/// Sanitize resolved records, assign run-unique keys, and build the report.
fn finalize(items: Vec<EmittedItem>, grammar: Grammar) -> RunOutput {
    let mut seen_keys: HashMap<String, usize> = HashMap::new();
    let mut items: Vec<EmittedItem> = items
        .into_iter()
        .enumerate()
        .map(|(emit_index, item)| {
            let outcome = match item.outcome {
                ResolutionOutcome::Resolved(record) => {
                    let mut record = sanitize_record(&record, grammar);
                    if record.key.is_empty() {
                        record.key = format!("ref-{emit_index}");
                    }
                    ResolutionOutcome::Resolved(record)
                }
                failed => failed,
            };
            EmittedItem {
                occurrence: item.occurrence,
                outcome,
            }
        })
        .collect();

    // Run-unique keys: the same work cited twice keeps its key; distinct
    // works colliding on a key get a numeric suffix.
    let mut titles_by_key: HashMap<String, String> = HashMap::new();
    for item in &mut items {
        if let ResolutionOutcome::Resolved(record) = &mut item.outcome {
            let base = record.key.clone();
            match titles_by_key.get(&base) {
                Some(title) if *title == record.title => {}
                Some(_) => {
                    let n = seen_keys.entry(base.clone()).or_insert(1);
                    *n += 1;
                    record.key = format!("{}-{}", base, n);
                    titles_by_key.insert(record.key.clone(), record.title.clone());
                }
                None => {
                    titles_by_key.insert(base, record.title.clone());
                }
            }
        }
    }

    let report = FailureReport {
        entries: items
            .iter()
            .filter_map(|item| match &item.outcome {
                ResolutionOutcome::Failed { reason, detail } => Some(FailureEntry {
                    position: item.occurrence.position,
                    raw: item.occurrence.raw.clone(),
                    reason: *reason,
                    detail: detail.clone(),
                }),
                _ => None,
            })
            .collect(),
    };

    let stats = RunStats::tally(&items);
    tracing::info!(
        total = stats.total,
        resolved = stats.resolved(),
        failed = stats.failed(),
        "pipeline run complete"
    );

    RunOutput {
        items,
        report,
        stats,
    }
}

fn excerpt(raw: &str) -> String {
    const MAX: usize = 60;
    if raw.chars().count() <= MAX {
        raw.to_string()
    } else {
        let cut: String = raw.chars().take(MAX).collect();
        format!("{cut}…")
    }
}
