use anyhow::Result;
use clap::Args;
use tenure_core::error::ErrorCode;
use tenure_core::store::HistoryStore;
use tenure_core::verify::check_history;
use tracing::{info, warn};

use super::Project;
use crate::output::{OutputMode, coded, pretty_kv, pretty_section, render};

#[derive(Args, Debug, Default)]
pub struct VerifyArgs {
    /// Also list gaps (periods where a key had no value).
    #[arg(long)]
    pub gaps: bool,
}

/// Execute `tn verify`: check every key's intervals for overlaps, inverted
/// intervals and duplicate open records.
///
/// # Errors
///
/// Returns an error if the store cannot be read, or a
/// [`ErrorCode::CorruptHistory`] error when any invariant is violated.
pub fn run_verify(args: &VerifyArgs, project: &Project, output: OutputMode) -> Result<()> {
    let store = project.open_existing_store()?;
    let report = check_history(&store.all_records()?);

    for violation in &report.violations {
        warn!(%violation, "history invariant violated");
    }
    info!(
        records = report.records_checked,
        keys = report.keys_checked,
        violations = report.violations.len(),
        gaps = report.gaps.len(),
        "history verified"
    );

    render(output, &report, |report, mode, w| {
        if mode.is_pretty() {
            pretty_section(w, "Verify")?;
            pretty_kv(w, "records", report.records_checked.to_string())?;
            pretty_kv(w, "keys", report.keys_checked.to_string())?;
            pretty_kv(w, "violations", report.violations.len().to_string())?;
            pretty_kv(w, "gaps", report.gaps.len().to_string())?;
        }
        for violation in &report.violations {
            writeln!(w, "violation\t{violation}")?;
        }
        if args.gaps {
            for gap in &report.gaps {
                writeln!(
                    w,
                    "gap\t{}/{}\t{}..{}",
                    gap.entity_id, gap.attribute, gap.from, gap.to
                )?;
            }
        }
        if report.is_ok() && mode.is_pretty() {
            writeln!(w, "✓ history is consistent")?;
        }
        Ok(())
    })?;

    if report.is_ok() {
        Ok(())
    } else {
        Err(coded(
            ErrorCode::CorruptHistory,
            format!("{} interval violation(s) found", report.violations.len()),
        ))
    }
}
