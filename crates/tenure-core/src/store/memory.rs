//! In-memory [`HistoryStore`] used by tests, benches and scenario runs.
//!
//! Enforces the same row-level rules as the `SQLite` schema: at most one open
//! record per key, and no interval that ends before it starts. A unit of work
//! is a snapshot of the record list taken on `begin` and restored on
//! `rollback`.

use anyhow::anyhow;
use chrono::NaiveDate;

use super::{HistoryStore, OpenRecords, StoreError, collect_open, sort_records};
use crate::model::{AttributeType, HistoryRecord};

#[derive(Debug, Clone, Default)]
struct UnitBackup {
    records: Vec<HistoryRecord>,
    last_committed: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<HistoryRecord>,
    last_committed: Option<NaiveDate>,
    unit: Option<UnitBackup>,
    fail_commit_on: Option<NaiveDate>,
    closes: usize,
    inserts: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records, e.g. the open `SECTOR` interval
    /// an entity already has before a run.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = HistoryRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Make the commit of the unit that records `date` as committed fail.
    #[must_use]
    pub const fn fail_commit_on(mut self, date: NaiveDate) -> Self {
        self.fail_commit_on = Some(date);
        self
    }

    /// Successful `close_open_record` calls, including rolled-back ones.
    #[must_use]
    pub const fn closes(&self) -> usize {
        self.closes
    }

    /// Successful `insert_record` calls, including rolled-back ones.
    #[must_use]
    pub const fn inserts(&self) -> usize {
        self.inserts
    }

    #[must_use]
    pub const fn mutation_count(&self) -> usize {
        self.closes + self.inserts
    }

    #[must_use]
    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    #[must_use]
    pub const fn in_unit(&self) -> bool {
        self.unit.is_some()
    }

    fn open_position(&self, entity_id: &str, attribute: AttributeType) -> Option<usize> {
        self.records.iter().position(|record| {
            record.is_open() && record.entity_id == entity_id && record.attribute_type == attribute
        })
    }

    fn sorted(mut records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
        sort_records(&mut records);
        records
    }
}

impl HistoryStore for MemoryStore {
    fn load_open_records(&self) -> Result<OpenRecords, StoreError> {
        Ok(collect_open(&self.records))
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.unit.is_some() {
            return Err(anyhow!("unit of work already in progress").into());
        }
        self.unit = Some(UnitBackup {
            records: self.records.clone(),
            last_committed: self.last_committed,
        });
        Ok(())
    }

    fn close_open_record(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
        end_date: NaiveDate,
    ) -> Result<(), StoreError> {
        let Some(position) = self.open_position(entity_id, attribute) else {
            return Err(StoreError::NoOpenRecord {
                entity_id: entity_id.to_string(),
                attribute,
            });
        };

        let record = &mut self.records[position];
        if end_date < record.start_date {
            return Err(StoreError::OutOfOrder {
                entity_id: entity_id.to_string(),
                attribute,
                end_date,
                start_date: record.start_date,
            });
        }
        record.end_date = Some(end_date);
        self.closes += 1;
        Ok(())
    }

    fn insert_record(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
        start_date: NaiveDate,
        value: Option<&str>,
    ) -> Result<(), StoreError> {
        if self.open_position(entity_id, attribute).is_some() {
            return Err(anyhow!("{entity_id}/{attribute} already has an open record").into());
        }
        self.records.push(HistoryRecord::open(
            entity_id,
            attribute,
            start_date,
            value.map(str::to_string),
        ));
        self.inserts += 1;
        Ok(())
    }

    fn record_committed_date(&mut self, date: NaiveDate) -> Result<(), StoreError> {
        self.last_committed = self.last_committed.max(Some(date));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.unit.is_some()
            && self.fail_commit_on.is_some()
            && self.last_committed == self.fail_commit_on
        {
            return Err(anyhow!("injected commit failure").into());
        }
        self.unit = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(backup) = self.unit.take() {
            self.records = backup.records;
            self.last_committed = backup.last_committed;
        }
        Ok(())
    }

    fn last_committed_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.last_committed)
    }

    fn history(
        &self,
        entity_id: &str,
        attribute: Option<AttributeType>,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(Self::sorted(
            self.records
                .iter()
                .filter(|r| r.entity_id == entity_id)
                .filter(|r| attribute.is_none_or(|attr| r.attribute_type == attr))
                .cloned()
                .collect(),
        ))
    }

    fn all_records(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(Self::sorted(self.records.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::fixtures::date;
    use crate::model::{AttributeType, HistoryRecord};
    use crate::store::{HistoryStore, StoreError};

    fn seeded() -> MemoryStore {
        MemoryStore::with_records([HistoryRecord::open(
            "005930",
            AttributeType::Sector,
            date(2020, 1, 1),
            Some("전자".to_string()),
        )])
    }

    #[test]
    fn close_without_open_record_is_reported() {
        let mut store = MemoryStore::new();
        let err = store
            .close_open_record("000001", AttributeType::Market, date(2020, 1, 2))
            .unwrap_err();
        assert!(matches!(err, StoreError::NoOpenRecord { .. }));
    }

    #[test]
    fn second_open_record_for_a_key_is_rejected() {
        let mut store = seeded();
        let err = store
            .insert_record("005930", AttributeType::Sector, date(2020, 2, 1), Some("x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn inverted_close_is_rejected() {
        let mut store = seeded();
        let err = store
            .close_open_record("005930", AttributeType::Sector, date(2019, 12, 31))
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { .. }));
        assert!(store.records()[0].is_open());
    }

    #[test]
    fn rollback_restores_records_and_cursor() {
        let mut store = seeded();
        store.begin().unwrap();
        store
            .close_open_record("005930", AttributeType::Sector, date(2020, 6, 15))
            .unwrap();
        store
            .insert_record("005930", AttributeType::Sector, date(2020, 6, 15), Some("IT"))
            .unwrap();
        store.record_committed_date(date(2020, 6, 15)).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.records().len(), 1);
        assert!(store.records()[0].is_open());
        assert_eq!(store.last_committed_date().unwrap(), None);
        assert_eq!(store.mutation_count(), 2);
    }

    #[test]
    fn injected_commit_failure_keeps_unit_pending() {
        let mut store = MemoryStore::new().fail_commit_on(date(2020, 1, 3));

        store.begin().unwrap();
        store.record_committed_date(date(2020, 1, 2)).unwrap();
        store.commit().unwrap();

        store.begin().unwrap();
        store
            .insert_record("000001", AttributeType::Market, date(2020, 1, 3), Some("KOSPI"))
            .unwrap();
        store.record_committed_date(date(2020, 1, 3)).unwrap();
        assert!(store.commit().is_err());
        assert!(store.in_unit());
        store.rollback().unwrap();

        assert!(store.records().is_empty());
        assert_eq!(store.last_committed_date().unwrap(), Some(date(2020, 1, 2)));
    }

    #[test]
    fn as_of_uses_half_open_intervals() {
        let mut store = seeded();
        store
            .close_open_record("005930", AttributeType::Sector, date(2020, 6, 15))
            .unwrap();
        store
            .insert_record("005930", AttributeType::Sector, date(2020, 6, 15), Some("IT서비스"))
            .unwrap();

        let before = store
            .value_as_of("005930", AttributeType::Sector, date(2020, 6, 14))
            .unwrap()
            .unwrap();
        let on = store
            .value_as_of("005930", AttributeType::Sector, date(2020, 6, 15))
            .unwrap()
            .unwrap();
        assert_eq!(before.value.as_deref(), Some("전자"));
        assert_eq!(on.value.as_deref(), Some("IT서비스"));
        assert!(
            store
                .value_as_of("005930", AttributeType::Sector, date(2019, 1, 1))
                .unwrap()
                .is_none()
        );

        let stats = store.stats().unwrap();
        assert_eq!((stats.records, stats.open_records, stats.entities), (2, 1, 1));
    }
}
