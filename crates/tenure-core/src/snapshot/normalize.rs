//! Raw provider rows to a deduplicated [`Snapshot`].
//!
//! Rows arrive as JSON objects keyed by provider field names. Partitions are
//! concatenated in order, and a later row for an entity id replaces any
//! earlier one. Feeds that carry different columns for the same entities
//! are combined first with [`join_rows`].

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::fields::TrackingPlan;
use super::{EntityObservation, Snapshot};

/// One raw row from a provider partition.
pub type RawRow = serde_json::Map<String, Value>;

/// Counters describing what normalization kept and discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub rows: usize,
    /// Rows without a usable entity id.
    pub dropped: usize,
    /// Rows that replaced an earlier row for the same entity.
    pub duplicates: usize,
}

/// Normalize partitions in order into one snapshot.
pub fn normalize_partitions<'a, I>(plan: &TrackingPlan, partitions: I) -> (Snapshot, NormalizeStats)
where
    I: IntoIterator<Item = &'a [RawRow]>,
{
    let mut snapshot = Snapshot::new();
    let mut stats = NormalizeStats::default();
    let entity_field = plan.fields().entity_field();

    for rows in partitions {
        for row in rows {
            stats.rows += 1;
            let Some(entity_id) = row.get(entity_field).and_then(|v| clean_value(v, false)) else {
                stats.dropped += 1;
                continue;
            };

            let mut observation = EntityObservation::new(entity_id);
            for (attribute, field) in plan.extractors() {
                let value = row
                    .get(field)
                    .and_then(|v| clean_value(v, attribute.is_numeric()));
                observation.values.insert(attribute, value);
            }

            if snapshot.get(&observation.entity_id).is_some() {
                stats.duplicates += 1;
            }
            snapshot.insert(observation);
        }
    }

    if stats.dropped > 0 {
        warn!(
            dropped = stats.dropped,
            field = entity_field,
            "rows without an entity id were dropped"
        );
    }
    debug!(
        rows = stats.rows,
        entities = snapshot.len(),
        dropped = stats.dropped,
        duplicates = stats.duplicates,
        "normalized snapshot"
    );
    (snapshot, stats)
}

/// Inner-join `primary` rows with `joined` rows on `entity_field`.
///
/// Fields of the joined row are laid over the primary row, so a field both
/// carry takes the joined value. Among joined rows the last one for an
/// entity wins. Primary rows with no joined counterpart are dropped; the
/// second element counts them.
pub fn join_rows<'a, P, J>(entity_field: &str, primary: P, joined: J) -> (Vec<RawRow>, usize)
where
    P: IntoIterator<Item = &'a [RawRow]>,
    J: IntoIterator<Item = &'a [RawRow]>,
{
    let entity_of = |row: &RawRow| row.get(entity_field).and_then(|v| clean_value(v, false));

    let mut by_entity: HashMap<String, &'a RawRow> = HashMap::new();
    for row in joined.into_iter().flatten() {
        if let Some(entity_id) = entity_of(row) {
            by_entity.insert(entity_id, row);
        }
    }

    let mut merged = Vec::new();
    let mut unmatched = 0;
    for row in primary.into_iter().flatten() {
        let Some(extra) = entity_of(row).and_then(|id| by_entity.get(&id).copied()) else {
            unmatched += 1;
            continue;
        };
        let mut combined = row.clone();
        combined.extend(extra.iter().map(|(field, value)| (field.clone(), value.clone())));
        merged.push(combined);
    }
    (merged, unmatched)
}

/// Canonical text for a raw cell, or `None` when it carries no value.
///
/// Strings are trimmed; empty strings and the provider's `-` placeholder are
/// treated as absent. Numeric attributes drop thousands separators so that
/// `"1,000"` and `1000` compare equal.
#[must_use]
pub fn clean_value(value: &Value, numeric: bool) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == "-" {
                return None;
            }
            if numeric {
                let stripped: String = trimmed.chars().filter(|c| *c != ',').collect();
                (!stripped.is_empty()).then_some(stripped)
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
