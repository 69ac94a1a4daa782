use std::io::Write;

use owo_colors::OwoColorize;
use refsolve_core::{MatchTier, ProgressEvent, ResolutionOutcome, RunOutput};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print a real-time progress event.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::Resolving {
            index,
            total,
            excerpt,
        } => {
            writeln!(w, "[{}/{}] Resolving: \"{}\"", index + 1, total, excerpt)?;
        }
        ProgressEvent::Resolved { index, total, tier } => {
            let idx = index + 1;
            let label = tier.to_string().to_uppercase();
            if color.enabled() {
                let colored = match tier {
                    MatchTier::Exact => label.green().to_string(),
                    MatchTier::Normalized => label.cyan().to_string(),
                    _ => label.yellow().to_string(),
                };
                writeln!(w, "[{}/{}] -> {}", idx, total, colored)?;
            } else {
                writeln!(w, "[{}/{}] -> {}", idx, total, label)?;
            }
        }
        ProgressEvent::Failed {
            index,
            total,
            reason,
        } => {
            let idx = index + 1;
            let label = reason.to_string().to_uppercase();
            if color.enabled() {
                writeln!(w, "[{}/{}] -> {}", idx, total, label.red())?;
            } else {
                writeln!(w, "[{}/{}] -> {}", idx, total, label)?;
            }
        }
        ProgressEvent::RetryWait {
            source,
            attempt,
            backoff,
        } => {
            let msg = format!(
                "{}: retry {} after {:.1}s",
                source,
                attempt,
                backoff.as_secs_f64()
            );
            if color.enabled() {
                writeln!(w, "{}", msg.dimmed())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
    }
    Ok(())
}

/// Print the end-of-run summary and the failure report.
pub fn print_summary(
    w: &mut dyn Write,
    output: &RunOutput,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    writeln!(w, "{} occurrences processed", output.stats.total)?;

    let resolved_line = format!(
        "  resolved: {} (exact {}, normalized {}, fuzzy {})",
        output.stats.resolved(),
        output.stats.exact,
        output.stats.normalized,
        output.stats.fuzzy,
    );
    if color.enabled() {
        writeln!(w, "{}", resolved_line.green())?;
    } else {
        writeln!(w, "{}", resolved_line)?;
    }

    let failed_line = format!(
        "  failed:   {} (not found {}, ambiguous {}, external {}, malformed {})",
        output.stats.failed(),
        output.stats.not_found,
        output.stats.ambiguous,
        output.stats.external_error,
        output.stats.malformed,
    );
    if output.stats.failed() > 0 {
        if color.enabled() {
            writeln!(w, "{}", failed_line.red())?;
        } else {
            writeln!(w, "{}", failed_line)?;
        }
    } else {
        writeln!(w, "{}", failed_line)?;
    }

    // Fuzzy matches are resolved but lower confidence; surface them.
    let fuzzy: Vec<_> = output
        .items
        .iter()
        .filter_map(|item| item.outcome.record())
        .filter(|record| record.tier == MatchTier::Fuzzy)
        .collect();
    if !fuzzy.is_empty() {
        writeln!(w)?;
        writeln!(w, "Fuzzy matches (verify before publishing):")?;
        for record in fuzzy {
            let line = format!("  {} -> \"{}\"", record.key, record.title);
            if color.enabled() {
                writeln!(w, "{}", line.yellow())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
    }

    if !output.report.is_empty() {
        writeln!(w)?;
        writeln!(w, "Failures:")?;
        for entry in &output.report.entries {
            let line = format!(
                "  at byte {}: [{}] {} - {}",
                entry.position, entry.reason, entry.raw, entry.detail
            );
            if color.enabled() {
                writeln!(w, "{}", line.red())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
    }

    Ok(())
}

/// Print extracted occurrences (the `extract` subcommand).
pub fn print_occurrences(
    w: &mut dyn Write,
    occurrences: &[refsolve_core::CitationOccurrence],
) -> std::io::Result<()> {
    writeln!(w, "Found {} citation occurrences", occurrences.len())?;
    for occ in occurrences {
        match &occ.inline_identifier {
            Some(id) => writeln!(w, "  @{}: {} ({})", occ.position, occ.raw, id)?,
            None => writeln!(w, "  @{}: {}", occ.position, occ.raw)?,
        }
    }
    Ok(())
}

/// Print an outcome breakdown line for one emitted item (verbose mode).
pub fn print_item(
    w: &mut dyn Write,
    item: &refsolve_core::EmittedItem,
    color: ColorMode,
) -> std::io::Result<()> {
    match &item.outcome {
        ResolutionOutcome::Resolved(record) => {
            let line = format!(
                "@{} {} [{}] \"{}\"",
                item.occurrence.position, record.key, record.tier, record.title
            );
            if color.enabled() && record.tier == MatchTier::Fuzzy {
                writeln!(w, "{}", line.yellow())
            } else {
                writeln!(w, "{}", line)
            }
        }
        ResolutionOutcome::Failed { reason, detail } => {
            let line = format!("@{} [{}] {}", item.occurrence.position, reason, detail);
            if color.enabled() {
                writeln!(w, "{}", line.red())
            } else {
                writeln!(w, "{}", line)
            }
        }
    }
}
