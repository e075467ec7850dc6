//! Snapshot sources consumed by the batch driver.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use super::Snapshot;
use super::fields::TrackingPlan;
use super::normalize::{RawRow, join_rows, normalize_partitions};
use crate::model::COMPACT_DATE_FORMAT;

/// Why a date's snapshot could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("partition {partition} has no file at {}", path.display())]
    MissingPartition { partition: String, path: PathBuf },

    #[error("partition {partition} is empty at {}", path.display())]
    EmptyPartition { partition: String, path: PathBuf },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no snapshot recorded for {0}")]
    NotFound(NaiveDate),
}

/// Produces one normalized snapshot per observation date.
pub trait SnapshotProvider {
    /// Fetch and normalize the snapshot for `date`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the date's data is missing or unreadable.
    /// The batch driver treats every such error as "skip this date".
    fn fetch(&mut self, date: NaiveDate) -> Result<Snapshot, SourceError>;
}

/// Reads `<root>/<partition>/<YYYYMMDD>.json` for every configured partition.
///
/// Partitions are concatenated. Join partitions, when configured, are read
/// the same way and inner-joined onto those rows by entity id, so a
/// category feed and a realtime feed can each contribute their columns.
#[derive(Debug, Clone)]
pub struct DirSnapshotProvider {
    root: PathBuf,
    partitions: Vec<String>,
    join: Vec<String>,
    plan: TrackingPlan,
}

impl DirSnapshotProvider {
    pub fn new(root: impl Into<PathBuf>, partitions: Vec<String>, plan: TrackingPlan) -> Self {
        Self {
            root: root.into(),
            partitions,
            join: Vec::new(),
            plan,
        }
    }

    /// Partitions whose rows are joined onto the concatenated partitions.
    #[must_use]
    pub fn with_join(mut self, join: Vec<String>) -> Self {
        self.join = join;
        self
    }

    /// File expected for `partition` on `date`.
    #[must_use]
    pub fn partition_path(&self, partition: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(partition)
            .join(format!("{}.json", date.format(COMPACT_DATE_FORMAT)))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_partition(&self, partition: &str, date: NaiveDate) -> Result<Vec<RawRow>, SourceError> {
        let path = self.partition_path(partition, date);
        if !path.exists() {
            return Err(SourceError::MissingPartition {
                partition: partition.to_string(),
                path,
            });
        }

        let text = std::fs::read_to_string(&path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let rows = parse_document(&text).map_err(|source| SourceError::Parse {
            path: path.clone(),
            source,
        })?;

        if rows.is_empty() {
            return Err(SourceError::EmptyPartition {
                partition: partition.to_string(),
                path,
            });
        }
        Ok(rows)
    }

    fn read_all(&self, names: &[String], date: NaiveDate) -> Result<Vec<Vec<RawRow>>, SourceError> {
        names
            .iter()
            .map(|partition| self.read_partition(partition, date))
            .collect()
    }
}

impl SnapshotProvider for DirSnapshotProvider {
    fn fetch(&mut self, date: NaiveDate) -> Result<Snapshot, SourceError> {
        let partitions = self.read_all(&self.partitions, date)?;

        let (snapshot, stats) = if self.join.is_empty() {
            normalize_partitions(&self.plan, partitions.iter().map(Vec::as_slice))
        } else {
            let joined = self.read_all(&self.join, date)?;
            let (rows, unmatched) = join_rows(
                self.plan.fields().entity_field(),
                partitions.iter().map(Vec::as_slice),
                joined.iter().map(Vec::as_slice),
            );
            debug!(%date, unmatched, "joined partitions");
            normalize_partitions(&self.plan, [rows.as_slice()])
        };
        debug!(%date, rows = stats.rows, entities = snapshot.len(), "fetched snapshot");
        Ok(snapshot)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Rows(Vec<RawRow>),
    Block {
        block1: Vec<RawRow>,
    },
    OutBlock {
        #[serde(rename = "OutBlock_1")]
        out_block: Vec<RawRow>,
    },
}

/// Parse a partition document: a bare array of records, or the provider's
/// `block1` / `OutBlock_1` response envelope.
///
/// # Errors
///
/// Returns the JSON error when the text matches none of those shapes.
pub fn parse_document(text: &str) -> Result<Vec<RawRow>, serde_json::Error> {
    Ok(match serde_json::from_str::<Document>(text)? {
        Document::Rows(rows) | Document::Block { block1: rows } => rows,
        Document::OutBlock { out_block } => out_block,
    })
}

/// Snapshots held in memory, keyed by date. Dates without an entry are
/// reported as unavailable.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotProvider {
    snapshots: BTreeMap<NaiveDate, Snapshot>,
    fetches: usize,
}

impl MemorySnapshotProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, snapshot: Snapshot) {
        self.snapshots.insert(date, snapshot);
    }

    #[must_use]
    pub fn with(mut self, date: NaiveDate, snapshot: Snapshot) -> Self {
        self.insert(date, snapshot);
        self
    }

    /// Number of `fetch` calls served so far, including misses.
    #[must_use]
    pub const fn fetches(&self) -> usize {
        self.fetches
    }
}

impl SnapshotProvider for MemorySnapshotProvider {
    fn fetch(&mut self, date: NaiveDate) -> Result<Snapshot, SourceError> {
        self.fetches += 1;
        self.snapshots
            .get(&date)
            .cloned()
            .ok_or(SourceError::NotFound(date))
    }
}
