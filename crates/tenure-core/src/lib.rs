//! tenure-core library.
//!
//! Keeps a versioned, interval-based history of per-security attributes
//! (sector, market, name, department, share count) and reconciles it
//! against daily provider snapshots.
//!
//! The pipeline, leaves first:
//!
//! - [`snapshot`] turns raw provider rows into a deduplicated [`snapshot::Snapshot`]
//! - [`store`] is the persistence boundary ([`store::HistoryStore`]), with an
//!   in-memory double and the `SQLite` backend in [`db`]
//! - [`cache`] holds the "currently open" projection for one run
//! - [`reconcile`] diffs a snapshot against the cache and emits close/open
//!   mutations
//! - [`batch`] sequences dates for daily and backfill runs
//!
//! # Conventions
//!
//! - **Errors**: [`error::SyncError`] at the engine seams, `anyhow::Result`
//!   inside store backends and at the CLI edge.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod batch;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
#[doc(hidden)]
pub mod fixtures;
pub mod lock;
pub mod model;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod verify;
