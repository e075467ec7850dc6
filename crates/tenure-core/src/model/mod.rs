//! Domain types shared by the store, cache and engine.

pub mod attribute;
pub mod record;

pub use attribute::{AttributeType, UnknownAttribute};
pub use record::HistoryRecord;

use chrono::NaiveDate;

/// Storage and display format for observation dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Compact format used by the provider and snapshot file names.
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

/// Error returned when a date string matches neither accepted format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date '{0}' (expected YYYY-MM-DD or YYYYMMDD)")]
pub struct ParseDateError(pub String);

/// Parse `YYYY-MM-DD` or `YYYYMMDD`.
///
/// # Errors
///
/// Returns [`ParseDateError`] when the input is not a valid calendar date in
/// either format.
pub fn parse_date(input: &str) -> Result<NaiveDate, ParseDateError> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(trimmed, COMPACT_DATE_FORMAT))
        .map_err(|_| ParseDateError(input.to_string()))
}
