use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::attribute::AttributeType;

/// One versioned attribute value with its validity interval.
///
/// Intervals are half-open: the value holds on `start_date` and on every day
/// before `end_date`. An unset `end_date` marks the currently valid value.
/// `value = None` is a stored null, which is different from the attribute
/// never having been observed for the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub entity_id: String,
    pub attribute_type: AttributeType,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub value: Option<String>,
}

impl HistoryRecord {
    /// Build a record that is open from `start_date` onward.
    pub fn open(
        entity_id: impl Into<String>,
        attribute_type: AttributeType,
        start_date: NaiveDate,
        value: Option<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            attribute_type,
            start_date,
            end_date: None,
            value,
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end_date.is_none()
    }

    /// Whether `date` falls inside `[start_date, end_date)`.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && self.end_date.is_none_or(|end| date < end)
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryRecord;
    use crate::fixtures::date;
    use crate::model::AttributeType;

    #[test]
    fn interval_is_half_open() {
        let mut record = HistoryRecord::open(
            "005930",
            AttributeType::Sector,
            date(2020, 1, 1),
            Some("전자".to_string()),
        );
        record.end_date = Some(date(2020, 6, 15));

        assert!(record.contains(date(2020, 1, 1)));
        assert!(record.contains(date(2020, 6, 14)));
        assert!(!record.contains(date(2020, 6, 15)));
        assert!(!record.contains(date(2019, 12, 31)));
        assert!(!record.is_open());
    }

    #[test]
    fn open_record_extends_forever() {
        let record = HistoryRecord::open("000001", AttributeType::Market, date(2021, 3, 2), None);
        assert!(record.is_open());
        assert!(record.contains(date(2099, 1, 1)));
    }
}
