use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::Args;
use serde::Serialize;
use tenure_core::batch::BatchDriver;
use tenure_core::error::SyncError;
use tenure_core::model::parse_date;
use tenure_core::reconcile::{Change, Reconciler};
use tenure_core::snapshot::SnapshotProvider;
use tracing::info;

use super::{Project, write_run_report};
use crate::output::{OutputMode, pretty_section, render};

#[derive(Args, Debug)]
pub struct DailyArgs {
    /// Run date (YYYY-MM-DD or YYYYMMDD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Print the changes the run would apply without writing them.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct DryRun {
    date: NaiveDate,
    entities: usize,
    changes: Vec<Change>,
}

/// Execute `tn daily`: reconcile one date under the writer lock.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken, the store cannot be opened,
/// or the run aborts. A missing snapshot is reported as a skipped date, not
/// an error.
pub fn run_daily(args: &DailyArgs, project: &Project, output: OutputMode) -> Result<()> {
    let date = args.date.unwrap_or_else(|| Local::now().date_naive());
    if args.dry_run {
        return dry_run(date, project, output);
    }

    let _lock = project.writer_lock()?;
    let mut store = project.open_store()?;
    let mut provider = project.provider()?;
    let reconciler = Reconciler::new(&mut store, project.tracking_plan()?)?;
    let mut driver = BatchDriver::new(reconciler);

    let report = driver.run_daily(date, &mut provider)?;
    render(output, &report, write_run_report)
}

/// Diff the date's snapshot against the stored open records. Only loads the
/// cache, so it never takes the writer lock.
fn dry_run(date: NaiveDate, project: &Project, output: OutputMode) -> Result<()> {
    let mut store = project.open_existing_store()?;
    let snapshot = project
        .provider()?
        .fetch(date)
        .map_err(|source| SyncError::SourceUnavailable { date, source })?;

    let reconciler = Reconciler::new(&mut store, project.tracking_plan()?)?;
    let changes = reconciler.diff(&snapshot);
    info!(%date, changes = changes.len(), "dry run");

    let report = DryRun {
        date,
        entities: snapshot.len(),
        changes,
    };
    render(output, &report, |report, mode, w| {
        if mode.is_pretty() {
            pretty_section(w, &format!("Dry run for {}", report.date))?;
        }
        for change in &report.changes {
            let previous = match &change.previous {
                None => "-".to_string(),
                Some(value) => value.clone().unwrap_or_else(|| "(null)".to_string()),
            };
            let observed = change.observed.as_deref().unwrap_or("-");
            writeln!(
                w,
                "{}\t{}\t{previous}\t{observed}",
                change.entity_id, change.attribute
            )?;
        }
        if mode.is_pretty() {
            writeln!(
                w,
                "\n{} change(s) across {} entities",
                report.changes.len(),
                report.entities
            )?;
        }
        Ok(())
    })
}
