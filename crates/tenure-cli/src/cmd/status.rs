//! `tn status`: where the history stands.

use anyhow::{Context as _, Result};
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tenure_core::db::migrations::current_schema_version;
use tenure_core::model::AttributeType;
use tenure_core::store::{HistoryStore, StoreStats};

use super::{Project, format_cursor};
use crate::output::{OutputMode, pretty_kv, pretty_section, render};

#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: PathBuf,
    pub schema_version: u32,
    pub last_committed: Option<NaiveDate>,
    pub stats: StoreStats,
    pub tracked: Vec<AttributeType>,
    pub partitions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub join: Vec<String>,
}

/// Execute `tn status`.
///
/// # Errors
///
/// Returns an error if the database is missing or cannot be read.
pub fn run_status(_args: &StatusArgs, project: &Project, output: OutputMode) -> Result<()> {
    let store = project.open_existing_store()?;
    let report = StatusReport {
        database: project.db_path.clone(),
        schema_version: current_schema_version(store.connection())
            .context("read schema version")?,
        last_committed: store.last_committed_date()?,
        stats: store.stats()?,
        tracked: project.tracking_plan()?.attributes().to_vec(),
        partitions: project.config.source.partitions.clone(),
        join: project.config.source.join.clone(),
    };

    render(output, &report, |report, mode, w| {
        if mode.is_pretty() {
            pretty_section(w, "Status")?;
        }
        let tracked = report
            .tracked
            .iter()
            .map(|attr| attr.as_str())
            .collect::<Vec<_>>()
            .join(",");
        pretty_kv(w, "database", report.database.display().to_string())?;
        pretty_kv(w, "schema", format!("v{}", report.schema_version))?;
        pretty_kv(w, "last committed", format_cursor(report.last_committed))?;
        pretty_kv(w, "records", report.stats.records.to_string())?;
        pretty_kv(w, "open records", report.stats.open_records.to_string())?;
        pretty_kv(w, "entities", report.stats.entities.to_string())?;
        pretty_kv(w, "tracked", tracked)?;
        pretty_kv(w, "partitions", report.partitions.join(","))?;
        if !report.join.is_empty() {
            pretty_kv(w, "joined", report.join.join(","))?;
        }
        Ok(())
    })
}
