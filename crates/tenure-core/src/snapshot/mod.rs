//! Normalized per-date snapshots and the sources that produce them.
//!
//! A [`Snapshot`] holds at most one [`EntityObservation`] per entity id.
//! Inserting an entity that is already present replaces its observation, so
//! concatenating source partitions gives last-occurrence-wins semantics.

pub mod fields;
pub mod normalize;
pub mod provider;

pub use provider::{DirSnapshotProvider, MemorySnapshotProvider, SnapshotProvider, SourceError};

use std::collections::{BTreeMap, HashMap};

use crate::model::AttributeType;

/// Observed attribute values for one entity on one date.
///
/// A missing attribute and an attribute mapped to `None` both mean the
/// source reported no value for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityObservation {
    pub entity_id: String,
    pub values: BTreeMap<AttributeType, Option<String>>,
}

impl EntityObservation {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            values: BTreeMap::new(),
        }
    }

    /// Observed value, `None` when the source reported nothing.
    #[must_use]
    pub fn value(&self, attribute: AttributeType) -> Option<&str> {
        self.values.get(&attribute).and_then(Option::as_deref)
    }
}

/// One date's deduplicated observation set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    observations: Vec<EntityObservation>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an observation, replacing any earlier one for the same entity.
    pub fn insert(&mut self, observation: EntityObservation) {
        if let Some(&slot) = self.index.get(&observation.entity_id) {
            self.observations[slot] = observation;
        } else {
            self.index
                .insert(observation.entity_id.clone(), self.observations.len());
            self.observations.push(observation);
        }
    }

    /// Record a single attribute value, merging into the entity's observation.
    pub fn observe(&mut self, entity_id: &str, attribute: AttributeType, value: Option<&str>) {
        let slot = if let Some(&slot) = self.index.get(entity_id) {
            slot
        } else {
            self.insert(EntityObservation::new(entity_id));
            self.observations.len() - 1
        };
        self.observations[slot]
            .values
            .insert(attribute, value.map(str::to_string));
    }

    /// Builder form of [`Snapshot::observe`].
    #[must_use]
    pub fn with(mut self, entity_id: &str, attribute: AttributeType, value: Option<&str>) -> Self {
        self.observe(entity_id, attribute, value);
        self
    }

    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&EntityObservation> {
        self.index
            .get(entity_id)
            .map(|&slot| &self.observations[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityObservation> {
        self.observations.iter()
    }

    /// Number of distinct entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a EntityObservation;
    type IntoIter = std::slice::Iter<'a, EntityObservation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}
