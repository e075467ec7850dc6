//! Date sequencing for daily and backfill runs.
//!
//! The driver owns one [`Reconciler`] for the whole run, so the cache loaded
//! at the start carries every mutation from earlier dates into later ones.
//! Unavailable snapshots are skipped; any other failure aborts the run and
//! reports the last committed date to resume from. Dates before the resume
//! cursor were committed by an earlier run and are reported without being
//! fetched again.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{SyncError, error_chain};
use crate::reconcile::{DateReport, Reconciler};
use crate::snapshot::SnapshotProvider;

/// What happened to one date of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DateOutcome {
    Applied(DateReport),
    /// Before the resume cursor; committed by an earlier run.
    AlreadyApplied,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateResult {
    pub date: NaiveDate,
    pub outcome: DateOutcome,
}

/// Per-date results of a run, in date order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub dates: Vec<DateResult>,
    /// Resume cursor at the end of the run (or at the point of abort).
    pub last_committed: Option<NaiveDate>,
    pub elapsed_ms: u64,
}

impl RunReport {
    fn starting_at(last_committed: Option<NaiveDate>) -> Self {
        Self {
            last_committed,
            ..Self::default()
        }
    }

    pub fn applied(&self) -> impl Iterator<Item = &DateReport> {
        self.dates.iter().filter_map(|result| match &result.outcome {
            DateOutcome::Applied(report) => Some(report),
            DateOutcome::AlreadyApplied | DateOutcome::Skipped { .. } => None,
        })
    }

    pub fn skipped_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates
            .iter()
            .filter(|result| matches!(result.outcome, DateOutcome::Skipped { .. }))
            .map(|result| result.date)
    }

    /// Attribute changes summed over applied dates.
    pub fn already_applied_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates
            .iter()
            .filter(|result| result.outcome == DateOutcome::AlreadyApplied)
            .map(|result| result.date)
    }

    #[must_use]
    pub fn changed(&self) -> usize {
        self.applied().map(|report| report.changed).sum()
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// A run stopped by a non-recoverable error.
#[derive(Debug, thiserror::Error)]
#[error("run aborted on {date}")]
pub struct RunAbort {
    /// Date whose unit of work failed and was rolled back.
    pub date: NaiveDate,
    /// Resume cursor after the rollback.
    pub last_committed: Option<NaiveDate>,
    /// Dates completed before the failure.
    pub report: RunReport,
    #[source]
    pub error: SyncError,
}

impl RunAbort {
    /// First date a rerun needs to cover.
    #[must_use]
    pub fn resume_from(&self) -> NaiveDate {
        self.last_committed
            .and_then(|date| date.succ_opt())
            .map_or(self.date, |next| next.min(self.date))
    }
}

/// Drives a [`Reconciler`] across dates.
pub struct BatchDriver<'s> {
    reconciler: Reconciler<'s>,
}

impl<'s> BatchDriver<'s> {
    #[must_use]
    pub const fn new(reconciler: Reconciler<'s>) -> Self {
        Self { reconciler }
    }

    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler<'s> {
        &self.reconciler
    }

    #[must_use]
    pub fn into_reconciler(self) -> Reconciler<'s> {
        self.reconciler
    }

    /// Daily job: reconcile the single run date.
    ///
    /// # Errors
    ///
    /// See [`BatchDriver::run_range`].
    pub fn run_daily(
        &mut self,
        date: NaiveDate,
        provider: &mut dyn SnapshotProvider,
    ) -> Result<RunReport, RunAbort> {
        self.run_range(date, date, provider)
    }

    /// Backfill: reconcile every date in `start..=end` in increasing order.
    ///
    /// # Errors
    ///
    /// Returns [`RunAbort`] on an invalid range, an unreadable resume cursor,
    /// or the first non-recoverable reconciliation error. Dates before the
    /// failing one stay committed.
    pub fn run_range(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
        provider: &mut dyn SnapshotProvider,
    ) -> Result<RunReport, RunAbort> {
        let started = Instant::now();

        let cursor = match self.reconciler.store().last_committed_date() {
            Ok(cursor) => cursor,
            Err(err) => {
                return Err(RunAbort {
                    date: start,
                    last_committed: None,
                    report: RunReport::default(),
                    error: err.into(),
                });
            }
        };
        let mut report = RunReport::starting_at(cursor);

        if start > end {
            return Err(RunAbort {
                date: start,
                last_committed: cursor,
                report,
                error: SyncError::InvalidRange { start, end },
            });
        }

        info!(%start, %end, resume_cursor = ?cursor, "run started");

        for date in start.iter_days().take_while(|date| *date <= end) {
            // The cursor date itself is replayed: reconciling the latest
            // committed snapshot again is a no-op.
            if cursor.is_some_and(|cursor| date < cursor) {
                report.dates.push(DateResult {
                    date,
                    outcome: DateOutcome::AlreadyApplied,
                });
                continue;
            }

            let step = provider
                .fetch(date)
                .map_err(|source| SyncError::SourceUnavailable { date, source })
                .and_then(|snapshot| self.reconciler.reconcile(date, &snapshot));

            match step {
                Ok(applied) => {
                    report.last_committed = report.last_committed.max(Some(date));
                    report.dates.push(DateResult {
                        date,
                        outcome: DateOutcome::Applied(applied),
                    });
                }
                Err(err) if err.is_recoverable() => {
                    let reason = error_chain(&err);
                    warn!(%date, error = %reason, "skipping date");
                    report.dates.push(DateResult {
                        date,
                        outcome: DateOutcome::Skipped { reason },
                    });
                }
                Err(err) => {
                    report.elapsed_ms = elapsed_ms(started);
                    error!(
                        %date,
                        code = %err.code(),
                        last_committed = ?report.last_committed,
                        error = %error_chain(&err),
                        "run aborted"
                    );
                    return Err(RunAbort {
                        date,
                        last_committed: report.last_committed,
                        report,
                        error: err,
                    });
                }
            }
        }

        report.elapsed_ms = elapsed_ms(started);
        info!(
            applied = report.applied().count(),
            skipped = report.skipped_dates().count(),
            already_applied = report.already_applied_dates().count(),
            changed = report.changed(),
            last_committed = ?report.last_committed,
            elapsed_ms = report.elapsed_ms,
            "run finished"
        );
        Ok(report)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
