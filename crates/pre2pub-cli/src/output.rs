use std::io::Write;

use owo_colors::OwoColorize;
use pre2pub_core::{BatchStatus, MatchVerdict, Outcome, ResolveError, ResolveOutcome};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print one verdict on a single line.
pub fn print_verdict(
    w: &mut dyn Write,
    verdict: &MatchVerdict,
    color: ColorMode,
) -> std::io::Result<()> {
    match &verdict.outcome {
        Outcome::Matched { article } => {
            let via = match verdict.abstract_similarity {
                Some(score) => format!("{}, abstract similarity {:.3}", verdict.strategy, score),
                None => verdict.strategy.to_string(),
            };
            if color.enabled() {
                writeln!(
                    w,
                    "{} -> {} {} ({})",
                    verdict.doi,
                    "MATCHED".green().bold(),
                    article.url().green(),
                    via
                )
            } else {
                writeln!(w, "{} -> MATCHED {} ({})", verdict.doi, article.url(), via)
            }
        }
        Outcome::Unmatched => {
            let why = format!("{}, decided at {}", verdict.strategy, verdict.decided_at);
            if color.enabled() {
                writeln!(w, "{} -> {} ({})", verdict.doi, "UNMATCHED".yellow(), why.dimmed())
            } else {
                writeln!(w, "{} -> UNMATCHED ({})", verdict.doi, why)
            }
        }
    }
}

/// Print a resolution failure. A failure means the preprint could not be
/// checked, which is different from "no match".
pub fn print_error(
    w: &mut dyn Write,
    doi: &str,
    error: &ResolveError,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} -> {} {}", doi, "ERROR".red().bold(), error)
    } else {
        writeln!(w, "{} -> ERROR {}", doi, error)
    }
}

pub fn print_outcome(
    w: &mut dyn Write,
    outcome: &ResolveOutcome,
    color: ColorMode,
) -> std::io::Result<()> {
    match &outcome.result {
        Ok(verdict) => print_verdict(w, verdict, color),
        Err(e) => print_error(w, &outcome.doi, e, color),
    }
}

/// JSON form of one result: the serialized verdict, or `{doi, error}`.
pub fn result_json(doi: &str, result: &Result<MatchVerdict, ResolveError>) -> serde_json::Value {
    match result {
        Ok(verdict) => serde_json::to_value(verdict)
            .unwrap_or_else(|e| serde_json::json!({ "doi": doi, "error": e.to_string() })),
        Err(e) => serde_json::json!({ "doi": doi, "error": e.to_string() }),
    }
}

/// Print the final batch tally.
pub fn print_summary(
    w: &mut dyn Write,
    outcomes: &[ResolveOutcome],
    total: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    let count = |status: BatchStatus| outcomes.iter().filter(|o| o.status() == status).count();
    let matched = count(BatchStatus::Matched);
    let unmatched = count(BatchStatus::Unmatched);
    let failed = count(BatchStatus::Failed);
    let skipped = total.saturating_sub(outcomes.len());

    writeln!(w)?;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "SUMMARY".bold())?;
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "  Matched:   {}", matched.to_string().green())?;
        writeln!(w, "  Unmatched: {}", unmatched.to_string().yellow())?;
        writeln!(w, "  Failed:    {}", failed.to_string().red())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "SUMMARY")?;
        writeln!(w, "{}", sep)?;
        writeln!(w, "  Matched:   {}", matched)?;
        writeln!(w, "  Unmatched: {}", unmatched)?;
        writeln!(w, "  Failed:    {}", failed)?;
    }
    if skipped > 0 {
        writeln!(w, "  Cancelled: {}", skipped)?;
    }
    Ok(())
}
