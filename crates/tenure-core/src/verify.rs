//! Interval integrity checks over a full record set.
//!
//! Works on plain records so it can audit any store, including tables
//! written by other tools.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{AttributeType, HistoryRecord};

/// A broken interval invariant for one `(entity_id, attribute_type)` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// More than one record without an end date.
    MultipleOpen {
        entity_id: String,
        attribute: AttributeType,
        count: usize,
    },
    /// A record starts before its predecessor ends.
    Overlap {
        entity_id: String,
        attribute: AttributeType,
        earlier_start: NaiveDate,
        later_start: NaiveDate,
    },
    /// A record ends before it starts.
    Inverted {
        entity_id: String,
        attribute: AttributeType,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleOpen {
                entity_id,
                attribute,
                count,
            } => write!(f, "{entity_id}/{attribute}: {count} open records"),
            Self::Overlap {
                entity_id,
                attribute,
                earlier_start,
                later_start,
            } => write!(
                f,
                "{entity_id}/{attribute}: record from {earlier_start} overlaps record from {later_start}"
            ),
            Self::Inverted {
                entity_id,
                attribute,
                start_date,
                end_date,
            } => write!(
                f,
                "{entity_id}/{attribute}: ends {end_date} before it starts {start_date}"
            ),
        }
    }
}

/// Period with no record between two consecutive intervals.
///
/// Gaps are legitimate: a value that disappears is closed without a
/// successor until it is observed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub entity_id: String,
    pub attribute: AttributeType,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub records_checked: usize,
    pub keys_checked: usize,
    pub violations: Vec<Violation>,
    pub gaps: Vec<Gap>,
}

impl VerifyReport {
    /// `true` when no invariant is violated. Gaps do not count.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check every key's intervals for overlaps, inversions and extra open
/// records.
#[must_use]
pub fn check_history(records: &[HistoryRecord]) -> VerifyReport {
    let mut by_key: BTreeMap<(&str, AttributeType), Vec<&HistoryRecord>> = BTreeMap::new();
    for record in records {
        by_key
            .entry((record.entity_id.as_str(), record.attribute_type))
            .or_default()
            .push(record);
    }

    let mut report = VerifyReport {
        records_checked: records.len(),
        keys_checked: by_key.len(),
        ..VerifyReport::default()
    };

    for ((entity_id, attribute), mut intervals) in by_key {
        intervals.sort_by_key(|record| (record.start_date, record.end_date.is_none()));

        let open = intervals.iter().filter(|record| record.is_open()).count();
        if open > 1 {
            report.violations.push(Violation::MultipleOpen {
                entity_id: entity_id.to_string(),
                attribute,
                count: open,
            });
        }

        for record in &intervals {
            match record.end_date {
                Some(end_date) if end_date < record.start_date => {
                    report.violations.push(Violation::Inverted {
                        entity_id: entity_id.to_string(),
                        attribute,
                        start_date: record.start_date,
                        end_date,
                    });
                }
                _ => {}
            }
        }

        for pair in intervals.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            match earlier.end_date {
                Some(end) if end < later.start_date => report.gaps.push(Gap {
                    entity_id: entity_id.to_string(),
                    attribute,
                    from: end,
                    to: later.start_date,
                }),
                Some(end) if end == later.start_date => {}
                // An open predecessor never ends, so any successor overlaps it
                // unless both are open, which MultipleOpen already reports.
                None if later.is_open() => {}
                _ => report.violations.push(Violation::Overlap {
                    entity_id: entity_id.to_string(),
                    attribute,
                    earlier_start: earlier.start_date,
                    later_start: later.start_date,
                }),
            }
        }
    }

    report
}
