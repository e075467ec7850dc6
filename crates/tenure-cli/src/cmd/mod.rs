pub mod as_of;
pub mod backfill;
pub mod completions;
pub mod daily;
pub mod init;
pub mod show;
pub mod status;
pub mod verify;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tenure_core::batch::{DateOutcome, RunReport};
use tenure_core::config::{ProjectConfig, load_project_config, lock_path_for};
use tenure_core::db::SqliteStore;
use tenure_core::error::{ErrorCode, SyncError};
use tenure_core::lock::WriterLock;
use tenure_core::snapshot::DirSnapshotProvider;
use tenure_core::snapshot::fields::TrackingPlan;
use tracing::debug;

use crate::output::{Coded, OutputMode, coded, pretty_kv, pretty_section};

/// Paths that override `.tenure/config.toml` for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db: Option<PathBuf>,
    pub snapshots: Option<PathBuf>,
}

/// Resolved project context shared by every command.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub db_path: PathBuf,
    pub source_root: PathBuf,
}

impl Project {
    /// Load config from `root` and apply CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load(root: &Path, overrides: &Overrides) -> Result<Self> {
        let config = load_project_config(root).map_err(|err| {
            err.context(Coded::new(
                ErrorCode::ConfigParseError,
                "invalid project config",
            ))
        })?;
        let db_path = overrides
            .db
            .clone()
            .unwrap_or_else(|| config.db_path(root));
        let source_root = overrides
            .snapshots
            .clone()
            .unwrap_or_else(|| config.source_root(root));

        debug!(db = %db_path.display(), snapshots = %source_root.display(), "project loaded");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            db_path,
            source_root,
        })
    }

    /// Validated tracking plan from `[tracking]`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the tracked attribute set is invalid.
    pub fn tracking_plan(&self) -> Result<TrackingPlan> {
        self.config
            .tracking_plan()
            .map_err(|err| SyncError::Config(err).into())
    }

    /// Snapshot directory reader for the configured partitions and joins.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracking plan is invalid.
    pub fn provider(&self) -> Result<DirSnapshotProvider> {
        Ok(DirSnapshotProvider::new(
            &self.source_root,
            self.config.source.partitions.clone(),
            self.tracking_plan()?,
        )
        .with_join(self.config.source.join.clone()))
    }

    /// Open an existing history database.
    ///
    /// # Errors
    ///
    /// Returns an error if no database exists yet or it cannot be opened.
    pub fn open_existing_store(&self) -> Result<SqliteStore> {
        if !self.db_path.exists() {
            return Err(coded(
                ErrorCode::NotInitialized,
                format!("no history database at {}", self.db_path.display()),
            ));
        }
        self.open_store()
    }

    /// Open (creating and migrating if needed) the history database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path).map_err(|err| {
            err.context(Coded::new(
                ErrorCode::StoreUnavailable,
                format!("open history database {}", self.db_path.display()),
            ))
        })
    }

    /// Take the single-writer lock next to the database.
    ///
    /// # Errors
    ///
    /// Returns [`tenure_core::lock::LockError`] on timeout or I/O failure.
    pub fn writer_lock(&self) -> Result<WriterLock> {
        let path = lock_path_for(&self.db_path);
        Ok(WriterLock::acquire(&path, self.config.lock_timeout())?)
    }
}

/// Shared human rendering for `daily` and `backfill` run reports.
pub fn write_run_report(report: &RunReport, mode: OutputMode, w: &mut dyn Write) -> io::Result<()> {
    if mode.is_pretty() {
        pretty_section(w, "Run")?;
    }
    for result in &report.dates {
        match &result.outcome {
            DateOutcome::Applied(applied) => writeln!(
                w,
                "{}\tapplied\tentities={}\tchanged={}\topened={}\tclosed={}",
                result.date, applied.entities, applied.changed, applied.opened, applied.closed
            )?,
            DateOutcome::Skipped { reason } => {
                writeln!(w, "{}\tskipped\t{reason}", result.date)?;
            }
            DateOutcome::AlreadyApplied => {
                writeln!(w, "{}\talready-applied", result.date)?;
            }
        }
    }
    if mode.is_pretty() {
        writeln!(w)?;
        pretty_kv(w, "applied", report.applied().count().to_string())?;
        pretty_kv(w, "skipped", report.skipped_dates().count().to_string())?;
        pretty_kv(
            w,
            "already applied",
            report.already_applied_dates().count().to_string(),
        )?;
        pretty_kv(w, "changed", report.changed().to_string())?;
        pretty_kv(w, "last committed", format_cursor(report.last_committed))?;
        pretty_kv(w, "elapsed", format!("{}ms", report.elapsed_ms))?;
    }
    Ok(())
}

pub fn format_cursor(cursor: Option<chrono::NaiveDate>) -> String {
    cursor.map_or_else(|| "never".to_string(), |date| date.to_string())
}
