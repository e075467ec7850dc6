//! Persistence boundary for interval history.
//!
//! The engine only needs a handful of primitives: read every open record,
//! close the open record for a key, insert a new record, and bracket one
//! date's mutations in a unit of work. [`HistoryStore`] captures exactly
//! that, plus the read-side helpers the CLI reports with.
//!
//! Mutations issued outside `begin`/`commit` apply immediately.

pub mod memory;

pub use memory::MemoryStore;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{AttributeType, HistoryRecord};

/// Current value per entity per attribute, as held by open records.
pub type OpenRecords = HashMap<String, BTreeMap<AttributeType, Option<String>>>;

/// Failures raised by a [`HistoryStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A close was requested but no record is open for the key.
    #[error("no open {attribute} record for entity {entity_id}")]
    NoOpenRecord {
        entity_id: String,
        attribute: AttributeType,
    },

    /// A close dated before the open record's start. Snapshots must arrive
    /// in date order.
    #[error(
        "cannot close {attribute} record for entity {entity_id} at {end_date}: it opened on {start_date}"
    )]
    OutOfOrder {
        entity_id: String,
        attribute: AttributeType,
        end_date: NaiveDate,
        start_date: NaiveDate,
    },

    /// The backend could not read, write, or commit.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Row counts reported by `tn status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub open_records: usize,
    pub entities: usize,
}

pub trait HistoryStore {
    /// Every record whose end date is unset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store cannot be read.
    fn load_open_records(&self) -> Result<OpenRecords, StoreError>;

    /// Start a unit of work for one date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the unit cannot be started.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Set `end_date` on the open record for `(entity_id, attribute)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoOpenRecord`] when no record is open for the
    /// key, [`StoreError::OutOfOrder`] when `end_date` precedes the open
    /// record's start, or [`StoreError::Backend`] on storage failure.
    fn close_open_record(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
        end_date: NaiveDate,
    ) -> Result<(), StoreError>;

    /// Insert a new open record starting on `start_date`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store is unreachable or
    /// rejects the row.
    fn insert_record(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
        start_date: NaiveDate,
        value: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Advance the resume cursor to `date`. Called inside the date's unit of
    /// work; a date before the current cursor leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn record_committed_date(&mut self, date: NaiveDate) -> Result<(), StoreError>;

    /// Make the current unit of work durable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the commit fails. The unit is then
    /// still pending and must be rolled back.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard the current unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the rollback itself fails.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Last date whose unit of work committed, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn last_committed_date(&self) -> Result<Option<NaiveDate>, StoreError>;

    /// Records for an entity ordered by attribute then start date, optionally
    /// limited to one attribute.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn history(
        &self,
        entity_id: &str,
        attribute: Option<AttributeType>,
    ) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Every record in the store, ordered by key then start date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn all_records(&self) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Record whose half-open interval contains `date`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn value_as_of(
        &self,
        entity_id: &str,
        attribute: AttributeType,
        date: NaiveDate,
    ) -> Result<Option<HistoryRecord>, StoreError> {
        Ok(self
            .history(entity_id, Some(attribute))?
            .into_iter()
            .find(|record| record.contains(date)))
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failure.
    fn stats(&self) -> Result<StoreStats, StoreError> {
        let records = self.all_records()?;
        let entities: HashSet<&str> = records.iter().map(|r| r.entity_id.as_str()).collect();
        Ok(StoreStats {
            records: records.len(),
            open_records: records.iter().filter(|r| r.is_open()).count(),
            entities: entities.len(),
        })
    }
}

/// Canonical record order: entity, attribute, start date.
pub fn sort_records(records: &mut [HistoryRecord]) {
    records.sort_by(|a, b| {
        (&a.entity_id, a.attribute_type, a.start_date).cmp(&(
            &b.entity_id,
            b.attribute_type,
            b.start_date,
        ))
    });
}

/// Fold open records into the [`OpenRecords`] shape.
pub fn collect_open<'a, I>(records: I) -> OpenRecords
where
    I: IntoIterator<Item = &'a HistoryRecord>,
{
    let mut open = OpenRecords::new();
    for record in records.into_iter().filter(|r| r.is_open()) {
        open.entry(record.entity_id.clone())
            .or_default()
            .insert(record.attribute_type, record.value.clone());
    }
    open
}
