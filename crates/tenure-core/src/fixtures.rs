//! Literal builders shared by unit tests, integration tests and benches.
//! Not part of the supported API.

use chrono::NaiveDate;

/// Build a date from known-valid components.
///
/// # Panics
///
/// Panics if the components do not form a calendar date.
#[must_use]
#[allow(clippy::expect_used)]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date")
}
