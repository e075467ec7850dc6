//! Backfill runs over snapshot directories and the `SQLite` store, including
//! skipped dates, aborted dates and resumed runs.

use std::path::Path;

use chrono::NaiveDate;
use serde_json::json;
use tempfile::TempDir;
use tenure_core::batch::{BatchDriver, DateOutcome};
use tenure_core::cache::StateCache;
use tenure_core::db::SqliteStore;
use tenure_core::error::SyncError;
use tenure_core::fixtures::date;
use tenure_core::model::{AttributeType, HistoryRecord};
use tenure_core::reconcile::Reconciler;
use tenure_core::snapshot::fields::TrackingPlan;
use tenure_core::snapshot::{DirSnapshotProvider, MemorySnapshotProvider, Snapshot};
use tenure_core::store::{HistoryStore, MemoryStore};
use tenure_core::verify::check_history;

const D1: (i32, u32, u32) = (2020, 1, 2);
const D2: (i32, u32, u32) = (2020, 1, 3);
const D3: (i32, u32, u32) = (2020, 1, 4);

fn day((y, m, d): (i32, u32, u32)) -> NaiveDate {
    date(y, m, d)
}

fn write_partition(root: &Path, partition: &str, on: NaiveDate, rows: &serde_json::Value) {
    let dir = root.join(partition);
    std::fs::create_dir_all(&dir).unwrap();
    let body = json!({ "OutBlock_1": rows });
    std::fs::write(
        dir.join(format!("{}.json", on.format("%Y%m%d"))),
        serde_json::to_vec(&body).unwrap(),
    )
    .unwrap();
}

/// D1 and D3 complete; D2 only has its STK partition.
fn snapshot_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write_partition(
        root,
        "STK",
        day(D1),
        &json!([
            {"ISU_SRT_CD": "005930", "ISU_ABBRV": "삼성전자", "MKT_TP_NM": "KOSPI",
             "IDX_IND_NM": "전기전자", "SECT_TP_NM": "", "LIST_SHRS": "5,969,782,550"}
        ]),
    );
    write_partition(
        root,
        "KSQ",
        day(D1),
        &json!([
            {"ISU_SRT_CD": "000250", "ISU_ABBRV": "삼천당제약", "MKT_TP_NM": "KOSDAQ",
             "IDX_IND_NM": "제약", "SECT_TP_NM": "우량기업부", "LIST_SHRS": "22,150,000"}
        ]),
    );

    write_partition(
        root,
        "STK",
        day(D2),
        &json!([
            {"ISU_SRT_CD": "005930", "ISU_ABBRV": "삼성전자", "MKT_TP_NM": "KOSPI",
             "IDX_IND_NM": "반도체", "SECT_TP_NM": "", "LIST_SHRS": "5,969,782,550"}
        ]),
    );

    write_partition(
        root,
        "STK",
        day(D3),
        &json!([
            {"ISU_SRT_CD": "005930", "ISU_ABBRV": "삼성전자", "MKT_TP_NM": "KOSPI",
             "IDX_IND_NM": "전기전자", "SECT_TP_NM": "-", "LIST_SHRS": "5969782550"}
        ]),
    );
    write_partition(
        root,
        "KSQ",
        day(D3),
        &json!([
            {"ISU_SRT_CD": "000250", "ISU_ABBRV": "삼천당제약", "MKT_TP_NM": "KOSDAQ",
             "IDX_IND_NM": "제약", "SECT_TP_NM": "우량기업부", "LIST_SHRS": "22,150,000"},
            {"ISU_SRT_CD": "091990", "ISU_ABBRV": "셀트리온헬스케어", "MKT_TP_NM": "KOSDAQ",
             "IDX_IND_NM": "유통", "SECT_TP_NM": "우량기업부", "LIST_SHRS": "151,784,461"}
        ]),
    );

    dir
}

fn provider(root: &Path) -> DirSnapshotProvider {
    DirSnapshotProvider::new(
        root,
        vec!["STK".to_string(), "KSQ".to_string()],
        TrackingPlan::all(),
    )
}

#[test]
fn unavailable_middle_date_is_skipped_and_values_carry_forward() {
    let snapshots = snapshot_tree();
    let db_dir = TempDir::new().unwrap();
    let mut store = SqliteStore::open(&db_dir.path().join("history.db")).unwrap();
    let mut source = provider(snapshots.path());

    let mut driver =
        BatchDriver::new(Reconciler::new(&mut store, TrackingPlan::all()).unwrap());
    let report = driver.run_range(day(D1), day(D3), &mut source).unwrap();

    let applied: Vec<_> = report.applied().map(|r| r.date).collect();
    assert_eq!(applied, vec![day(D1), day(D3)]);
    assert_eq!(report.skipped_dates().collect::<Vec<_>>(), vec![day(D2)]);
    assert_eq!(report.last_committed, Some(day(D3)));
    match &report.dates[1].outcome {
        DateOutcome::Skipped { reason } => assert!(reason.contains("KSQ"), "{reason}"),
        other => panic!("D2 should be skipped, got {other:?}"),
    }

    let cache = driver.reconciler().cache();
    assert_eq!(
        cache.get("005930", AttributeType::Sector),
        Some(&Some("전기전자".to_string()))
    );
    assert_eq!(
        cache.get("005930", AttributeType::Shares),
        Some(&Some("5969782550".to_string()))
    );
    assert_eq!(cache.get("005930", AttributeType::Department), None);
    assert!(driver.reconciler().cache_matches_store().unwrap());

    let d3 = report.applied().last().unwrap();
    assert_eq!(d3.changed, 5, "only the new listing 091990 changes on D3");
    drop(driver);

    let sector = store.history("005930", Some(AttributeType::Sector)).unwrap();
    assert_eq!(sector.len(), 1);
    assert!(sector[0].is_open());
    assert_eq!(store.last_committed_date().unwrap(), Some(day(D3)));
    assert!(check_history(&store.all_records().unwrap()).is_ok());
}

#[test]
fn rerunning_committed_dates_after_reopen_is_a_no_op() {
    let snapshots = snapshot_tree();
    let db_dir = TempDir::new().unwrap();
    let db_path = db_dir.path().join("history.db");

    {
        let mut store = SqliteStore::open(&db_path).unwrap();
        let mut driver =
            BatchDriver::new(Reconciler::new(&mut store, TrackingPlan::all()).unwrap());
        driver
            .run_range(day(D1), day(D3), &mut provider(snapshots.path()))
            .unwrap();
    }

    let mut store = SqliteStore::open(&db_path).unwrap();
    let before = store.all_records().unwrap();
    let mut driver = BatchDriver::new(Reconciler::new(&mut store, TrackingPlan::all()).unwrap());
    let report = driver
        .run_range(day(D1), day(D3), &mut provider(snapshots.path()))
        .unwrap();
    assert_eq!(report.changed(), 0);
    assert_eq!(
        report.already_applied_dates().collect::<Vec<_>>(),
        vec![day(D1), day(D2)]
    );
    drop(driver);
    assert_eq!(store.all_records().unwrap(), before);
}

#[test]
fn rerun_over_a_changed_value_reports_committed_dates_without_refetching() {
    let mut store = MemoryStore::new();
    let sector = |value| Snapshot::new().with("005930", AttributeType::Sector, Some(value));
    let mut source = MemorySnapshotProvider::new()
        .with(day(D1), sector("전기전자"))
        .with(day(D2), sector("반도체"));

    let mut driver = BatchDriver::new(Reconciler::new(&mut store, TrackingPlan::all()).unwrap());
    driver.run_range(day(D1), day(D2), &mut source).unwrap();
    let rerun = driver.run_range(day(D1), day(D2), &mut source).unwrap();

    assert_eq!(rerun.dates[0].outcome, DateOutcome::AlreadyApplied);
    assert!(matches!(
        rerun.dates[1].outcome,
        DateOutcome::Applied(ref applied) if applied.changed == 0
    ));
    assert_eq!(rerun.last_committed, Some(day(D2)));
    assert_eq!(source.fetches(), 3, "D1 is not fetched again");
    assert!(driver.reconciler().cache_matches_store().unwrap());
    drop(driver);

    let history = store.history("005930", Some(AttributeType::Sector)).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].end_date, Some(day(D2)));
    assert!(history[1].is_open());
}

#[test]
fn snapshot_older_than_an_open_record_is_an_ordering_error() {
    let mut store = MemoryStore::with_records([HistoryRecord::open(
        "005930",
        AttributeType::Sector,
        day(D2),
        Some("반도체".to_string()),
    )]);
    let mut engine = Reconciler::new(&mut store, TrackingPlan::all()).unwrap();

    let err = engine
        .reconcile(
            day(D1),
            &Snapshot::new().with("005930", AttributeType::Sector, Some("전기전자")),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::OutOfOrder { date, start_date, .. } if date == day(D1) && start_date == day(D2)
    ));
    assert_eq!(err.code().code(), "E3004");
    assert!(engine.cache_matches_store().unwrap());
}

#[test]
fn failed_commit_aborts_with_last_committed_date_and_clean_cache() {
    let snapshot = |market: &str, shares: &str| {
        Snapshot::new()
            .with("000001", AttributeType::Market, Some(market))
            .with("000001", AttributeType::Shares, Some(shares))
    };
    let mut source = MemorySnapshotProvider::new()
        .with(day(D1), snapshot("KOSDAQ", "100"))
        .with(day(D2), snapshot("KOSPI", "200"))
        .with(day(D3), snapshot("KOSPI", "300"));
    let mut store = MemoryStore::new().fail_commit_on(day(D2));

    let mut driver = BatchDriver::new(Reconciler::new(&mut store, TrackingPlan::all()).unwrap());
    let abort = driver.run_range(day(D1), day(D3), &mut source).unwrap_err();

    assert_eq!(abort.date, day(D2));
    assert_eq!(abort.last_committed, Some(day(D1)));
    assert_eq!(abort.resume_from(), day(D2));
    assert!(matches!(abort.error, SyncError::StoreUnavailable(_)));
    assert_eq!(abort.report.applied().count(), 1);
    assert_eq!(source.fetches(), 2, "D3 must not be fetched after an abort");

    let reconciler = driver.reconciler();
    assert!(reconciler.cache_matches_store().unwrap());
    assert_eq!(
        reconciler.cache().get("000001", AttributeType::Market),
        Some(&Some("KOSDAQ".to_string()))
    );
    drop(driver);

    assert!(!store.in_unit());
    assert_eq!(store.records().len(), 2);
    assert_eq!(store.last_committed_date().unwrap(), Some(day(D1)));
}

#[test]
fn consistency_fault_rolls_back_partial_sqlite_mutations() {
    let stale = StateCache::load(&MemoryStore::with_records([HistoryRecord::open(
        "005930",
        AttributeType::Sector,
        date(2020, 1, 1),
        Some("전자".to_string()),
    )]))
    .unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    let engine = Reconciler::with_cache(&mut store, stale, TrackingPlan::all());
    let snapshot = Snapshot::new()
        .with("000001", AttributeType::Sector, Some("음식료품"))
        .with("005930", AttributeType::Sector, Some("IT서비스"));

    let mut source = MemorySnapshotProvider::new().with(day(D1), snapshot);
    let mut driver = BatchDriver::new(engine);
    let abort = driver.run_daily(day(D1), &mut source).unwrap_err();
    assert!(matches!(abort.error, SyncError::ConsistencyFault { .. }));
    assert_eq!(abort.last_committed, None);

    let engine = driver.into_reconciler();
    assert_eq!(engine.cache().get("000001", AttributeType::Sector), None);
    drop(engine);

    assert!(store.all_records().unwrap().is_empty());
    assert_eq!(store.last_committed_date().unwrap(), None);
}
