//! Static `attribute type -> source field` table and the validated tracking
//! plan the engine runs with.

use std::collections::{BTreeMap, HashSet};

use crate::config::ConfigError;
use crate::model::AttributeType;

/// Provider field holding the entity's short code.
pub const DEFAULT_ENTITY_FIELD: &str = "ISU_SRT_CD";

/// Which raw field each attribute type is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    entity_field: String,
    fields: BTreeMap<AttributeType, String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            entity_field: DEFAULT_ENTITY_FIELD.to_string(),
            fields: AttributeType::ALL
                .iter()
                .map(|attr| (*attr, attr.default_source_field().to_string()))
                .collect(),
        }
    }
}

impl FieldMap {
    #[must_use]
    pub fn with_field(mut self, attribute: AttributeType, field: impl Into<String>) -> Self {
        self.fields.insert(attribute, field.into());
        self
    }

    #[must_use]
    pub fn with_entity_field(mut self, field: impl Into<String>) -> Self {
        self.entity_field = field.into();
        self
    }

    #[must_use]
    pub fn field(&self, attribute: AttributeType) -> Option<&str> {
        self.fields
            .get(&attribute)
            .map(String::as_str)
            .filter(|field| !field.trim().is_empty())
    }

    #[must_use]
    pub fn entity_field(&self) -> &str {
        &self.entity_field
    }
}

/// Tracked attribute types plus their extractors, validated once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingPlan {
    attributes: Vec<AttributeType>,
    fields: FieldMap,
}

impl TrackingPlan {
    /// Validate and build a plan.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `attributes` is empty, repeats a type, or
    /// names a type without a non-empty source field, or if the entity id
    /// field is empty.
    pub fn new(attributes: Vec<AttributeType>, fields: FieldMap) -> Result<Self, ConfigError> {
        if attributes.is_empty() {
            return Err(ConfigError::NoTrackedAttributes);
        }
        if fields.entity_field().trim().is_empty() {
            return Err(ConfigError::MissingEntityField);
        }

        let mut seen = HashSet::new();
        for attribute in &attributes {
            if !seen.insert(*attribute) {
                return Err(ConfigError::DuplicateAttribute(*attribute));
            }
            if fields.field(*attribute).is_none() {
                return Err(ConfigError::MissingField(*attribute));
            }
        }

        Ok(Self { attributes, fields })
    }

    /// Track every attribute type with the provider's default fields.
    #[must_use]
    pub fn all() -> Self {
        Self {
            attributes: AttributeType::ALL.to_vec(),
            fields: FieldMap::default(),
        }
    }

    #[must_use]
    pub fn attributes(&self) -> &[AttributeType] {
        &self.attributes
    }

    #[must_use]
    pub const fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// `(attribute, source field)` pairs in tracking order.
    pub fn extractors(&self) -> impl Iterator<Item = (AttributeType, &str)> + '_ {
        self.attributes
            .iter()
            .filter_map(|attr| self.fields.field(*attr).map(|field| (*attr, field)))
    }
}
