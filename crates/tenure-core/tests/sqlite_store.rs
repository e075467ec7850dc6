//! On-disk behavior of the `SQLite` history store: durability across
//! reopen, migration idempotence, and agreement with the in-memory double.

use tempfile::TempDir;
use tenure_core::db::SqliteStore;
use tenure_core::db::migrations::{LATEST_SCHEMA_VERSION, current_schema_version};
use tenure_core::fixtures::date;
use tenure_core::model::AttributeType;
use tenure_core::reconcile::Reconciler;
use tenure_core::snapshot::Snapshot;
use tenure_core::snapshot::fields::TrackingPlan;
use tenure_core::store::{HistoryStore, MemoryStore};
use tenure_core::verify::check_history;

fn days() -> Vec<(chrono::NaiveDate, Snapshot)> {
    vec![
        (
            date(2020, 1, 2),
            Snapshot::new()
                .with("005930", AttributeType::Sector, Some("전기전자"))
                .with("005930", AttributeType::Market, Some("KOSPI"))
                .with("000250", AttributeType::Department, Some("우량기업부")),
        ),
        (
            date(2020, 1, 3),
            Snapshot::new()
                .with("005930", AttributeType::Sector, Some("반도체"))
                .with("005930", AttributeType::Market, Some("KOSPI"))
                .with("000250", AttributeType::Department, None),
        ),
        (
            date(2020, 1, 6),
            Snapshot::new()
                .with("005930", AttributeType::Sector, Some("반도체"))
                .with("000250", AttributeType::Department, Some("중견기업부")),
        ),
    ]
}

fn apply(store: &mut dyn HistoryStore) {
    let mut engine = Reconciler::new(store, TrackingPlan::all()).unwrap();
    for (day, snapshot) in days() {
        engine.reconcile(day, &snapshot).unwrap();
    }
}

#[test]
fn history_and_cursor_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("history.db");

    {
        let mut store = SqliteStore::open(&path).unwrap();
        apply(&mut store);
    }

    let mut reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(
        current_schema_version(reopened.connection()).unwrap(),
        LATEST_SCHEMA_VERSION
    );
    assert_eq!(reopened.last_committed_date().unwrap(), Some(date(2020, 1, 6)));

    let engine = Reconciler::new(&mut reopened, TrackingPlan::all()).unwrap();
    assert!(engine.cache_matches_store().unwrap());
    let (_, last) = days().pop().unwrap();
    assert!(engine.diff(&last).is_empty());
}

#[test]
fn sqlite_and_memory_produce_identical_history() {
    let dir = TempDir::new().unwrap();
    let mut sqlite = SqliteStore::open(&dir.path().join("history.db")).unwrap();
    let mut memory = MemoryStore::new();
    apply(&mut sqlite);
    apply(&mut memory);

    let records = sqlite.all_records().unwrap();
    assert_eq!(records, memory.all_records().unwrap());
    assert_eq!(sqlite.stats().unwrap(), memory.stats().unwrap());

    let report = check_history(&records);
    assert!(report.is_ok());
    assert_eq!(report.gaps.len(), 1, "department disappeared for one day");
}

#[test]
fn second_open_record_is_rejected_by_the_database() {
    let dir = TempDir::new().unwrap();
    let mut store = SqliteStore::open(&dir.path().join("history.db")).unwrap();
    apply(&mut store);

    let inserted = store.connection().execute(
        "INSERT INTO attribute_history (entity_id, attribute_type, start_date, end_date, value) \
         VALUES ('005930', 'SECTOR', '2020-02-01', NULL, 'IT')",
        [],
    );
    assert!(inserted.is_err());
    assert_eq!(
        store
            .history("005930", Some(AttributeType::Sector))
            .unwrap()
            .len(),
        2
    );
}
