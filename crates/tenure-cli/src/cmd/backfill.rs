use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::Args;
use tenure_core::batch::{BatchDriver, RunReport};
use tenure_core::error::ErrorCode;
use tenure_core::model::parse_date;
use tenure_core::reconcile::Reconciler;
use tenure_core::store::HistoryStore;
use tracing::info;

use super::{Project, write_run_report};
use crate::output::{OutputMode, coded, render};

#[derive(Args, Debug)]
pub struct BackfillArgs {
    /// First date to replay (YYYY-MM-DD or YYYYMMDD).
    #[arg(long, value_parser = parse_date, required_unless_present = "resume")]
    pub from: Option<NaiveDate>,

    /// Last date to replay, inclusive. Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub to: Option<NaiveDate>,

    /// Start from the day after the last committed date.
    #[arg(long, conflicts_with = "from")]
    pub resume: bool,
}

/// Execute `tn backfill`: replay `from..=to` in date order under the writer
/// lock. Dates whose snapshot is unavailable are skipped; the first other
/// failure aborts the run with the last committed date reported.
///
/// # Errors
///
/// Returns an error on lock contention, an invalid range, or an aborted run.
pub fn run_backfill(args: &BackfillArgs, project: &Project, output: OutputMode) -> Result<()> {
    let _lock = project.writer_lock()?;
    let mut store = project.open_store()?;

    let start = if args.resume {
        resume_start(&store)?
    } else {
        args.from
            .ok_or_else(|| coded(ErrorCode::InvalidDateRange, "--from is required"))?
    };
    let end = args.to.unwrap_or_else(|| Local::now().date_naive());
    info!(%start, %end, resume = args.resume, "backfill requested");

    if args.resume && start > end {
        info!(%end, "history already up to date");
        let report = RunReport {
            last_committed: store.last_committed_date()?,
            ..RunReport::default()
        };
        return render(output, &report, write_run_report);
    }

    let mut provider = project.provider()?;
    let reconciler = Reconciler::new(&mut store, project.tracking_plan()?)?;
    let mut driver = BatchDriver::new(reconciler);

    let report = driver.run_range(start, end, &mut provider)?;
    render(output, &report, write_run_report)
}

fn resume_start(store: &dyn HistoryStore) -> Result<NaiveDate> {
    let cursor = store.last_committed_date()?.ok_or_else(|| {
        coded(
            ErrorCode::InvalidDateRange,
            "nothing committed yet; pass --from for the first backfill",
        )
    })?;
    cursor.succ_opt().ok_or_else(|| {
        coded(
            ErrorCode::InvalidDateRange,
            "resume cursor is at the last representable date",
        )
    })
}
