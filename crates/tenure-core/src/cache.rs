//! In-memory projection of every currently open history record.
//!
//! The cache is loaded once per run and then kept in lockstep with each
//! mutation the engine issues. While a date is in flight every write is
//! journaled with the slot's previous contents, so a date whose commit fails
//! can be unwound and the cache never runs ahead of the store.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::AttributeType;
use crate::store::{HistoryStore, OpenRecords, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct JournalEntry {
    entity_id: String,
    attribute: AttributeType,
    /// `None` when the slot was unset before the write.
    previous: Option<Option<String>>,
}

/// `entity_id -> {attribute -> current value}` for one run.
///
/// A missing slot means the attribute has no open record (never observed, or
/// closed without a successor). A slot holding `None` is an open record whose
/// stored value is null.
#[derive(Debug, Clone, Default)]
pub struct StateCache {
    entries: OpenRecords,
    journal: Vec<JournalEntry>,
    journaling: bool,
}

impl StateCache {
    /// Build the cache from the store's open-records query.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the query fails.
    pub fn load<S: HistoryStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let cache = Self::from_open_records(store.load_open_records()?);
        debug!(
            entities = cache.entity_count(),
            open = cache.len(),
            "loaded state cache"
        );
        Ok(cache)
    }

    #[must_use]
    pub fn from_open_records(entries: OpenRecords) -> Self {
        Self {
            entries,
            journal: Vec::new(),
            journaling: false,
        }
    }

    /// Current slot for a key, `None` when unset.
    #[must_use]
    pub fn get(&self, entity_id: &str, attribute: AttributeType) -> Option<&Option<String>> {
        self.entries.get(entity_id)?.get(&attribute)
    }

    /// Overwrite the slot for a key.
    pub fn set(&mut self, entity_id: &str, attribute: AttributeType, value: Option<String>) {
        let previous = self
            .entries
            .entry(entity_id.to_string())
            .or_default()
            .insert(attribute, value);
        self.journal_write(entity_id, attribute, previous);
    }

    /// Return a slot to unset after its open record was closed without a
    /// successor.
    pub fn clear(&mut self, entity_id: &str, attribute: AttributeType) {
        let previous = self.remove_slot(entity_id, attribute);
        self.journal_write(entity_id, attribute, previous);
    }

    /// Start journaling writes for one date.
    pub fn begin_unit(&mut self) {
        self.journal.clear();
        self.journaling = true;
    }

    /// Keep the date's writes and drop the journal.
    pub fn commit_unit(&mut self) {
        self.journal.clear();
        self.journaling = false;
    }

    /// Undo every write since [`StateCache::begin_unit`], newest first.
    /// Returns the number of writes undone.
    pub fn revert_unit(&mut self) -> usize {
        self.journaling = false;
        let undone = self.journal.len();
        while let Some(entry) = self.journal.pop() {
            match entry.previous {
                Some(value) => {
                    self.entries
                        .entry(entry.entity_id)
                        .or_default()
                        .insert(entry.attribute, value);
                }
                None => {
                    self.remove_slot(&entry.entity_id, entry.attribute);
                }
            }
        }
        undone
    }

    /// Number of open slots across all entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn entries(&self) -> &OpenRecords {
        &self.entries
    }

    /// Whether the cache holds exactly what `open` describes.
    #[must_use]
    pub fn matches(&self, open: &OpenRecords) -> bool {
        &self.entries == open
    }

    fn remove_slot(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
    ) -> Option<Option<String>> {
        let attrs = self.entries.get_mut(entity_id)?;
        let previous = attrs.remove(&attribute);
        if attrs.is_empty() {
            self.entries.remove(entity_id);
        }
        previous
    }

    fn journal_write(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
        previous: Option<Option<String>>,
    ) {
        if self.journaling {
            self.journal.push(JournalEntry {
                entity_id: entity_id.to_string(),
                attribute,
                previous,
            });
        }
    }
}
