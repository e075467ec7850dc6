use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tenure_core::config::{CONFIG_RELATIVE_PATH, default_config_toml};
use tenure_core::db::migrations::current_schema_version;
use tracing::info;

use super::Project;
use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.tenure/config.toml` with the defaults.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct InitReport {
    config: PathBuf,
    config_written: bool,
    database: PathBuf,
    schema_version: u32,
    snapshots: PathBuf,
}

/// Execute `tn init`. Creates the project skeleton:
///
/// ```text
/// .tenure/
///   config.toml   (default config, unless one exists)
///   history.db    (migrated to the latest schema)
/// ```
///
/// The history database is created at the configured (or overridden) path.
///
/// # Errors
///
/// Returns an error if a filesystem operation fails or the database cannot
/// be created.
pub fn run_init(args: &InitArgs, project: &Project, output: OutputMode) -> Result<()> {
    let config_path = project.root.join(CONFIG_RELATIVE_PATH);
    let write_config = args.force || !config_path.exists();

    if write_config {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&config_path, default_config_toml()?)
            .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
    }

    let store = project.open_store()?;
    let schema_version = current_schema_version(store.connection())
        .context("read schema version")?;

    info!(
        db = %project.db_path.display(),
        schema_version,
        config_written = write_config,
        "project initialized"
    );

    let report = InitReport {
        config: config_path,
        config_written: write_config,
        database: project.db_path.clone(),
        schema_version,
        snapshots: project.source_root.clone(),
    };

    render(output, &report, |report, _, w| {
        let verb = if report.config_written { "wrote" } else { "kept" };
        writeln!(w, "✓ Initialized tenure project.")?;
        writeln!(w)?;
        pretty_kv(w, "config", format!("{} ({verb})", report.config.display()))?;
        pretty_kv(w, "database", report.database.display().to_string())?;
        pretty_kv(w, "schema", format!("v{}", report.schema_version))?;
        pretty_kv(w, "snapshots", report.snapshots.display().to_string())?;
        writeln!(w)?;
        writeln!(w, "Next steps:")?;
        writeln!(
            w,
            "  Place provider files at <snapshots>/<PARTITION>/<YYYYMMDD>.json, then run:"
        )?;
        writeln!(w, "    tn backfill --from 2020-01-02 --to 2020-12-30")
    })
}
