// ABOUTME: End-to-end sync tests over in-memory SQLite stores
// ABOUTME: Covers the monthly and abin pipelines, idempotence, daily scan alignment and isolation

use archive_replicator::config::Timeouts;
use archive_replicator::scan_index::ScanIndexDir;
use archive_replicator::schema::SchemaCatalog;
use archive_replicator::store::{Dialect, SqliteStore, Store, UnreachableStore};
use archive_replicator::sync::{watermark, ChunkPlanner, SyncOptions, Synchronizer, Watermark};
use archive_replicator::time::{start_of_day, Timestamp};
use archive_replicator::{SyncError, TableDescriptor, TransferRange};
use chrono::NaiveDate;
use std::sync::Arc;

const SCHEMA: &str = "\
CREATE TABLE `hV37_vD1` (
  `Timestamp` int(11) NOT NULL,
  `Project` varchar(32) DEFAULT NULL,
  PRIMARY KEY (`Timestamp`)
) ENGINE=InnoDB;
CREATE TABLE `fV66_vD1` (
  `Timestamp` int(11) NOT NULL,
  `Ante_Cont_AzimuthPositionCorre` float DEFAULT NULL,
  PRIMARY KEY (`Timestamp`)
) ENGINE=InnoDB;
CREATE TABLE `abin` (
  `Id` int(11) NOT NULL,
  `Timestamp` double DEFAULT NULL,
  `Description` varchar(32) DEFAULT NULL,
  `Bin` longblob,
  PRIMARY KEY (`Id`)
) ENGINE=InnoDB;
";

/// Source tables carry full column names; destinations the truncated ones.
fn source_store() -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory("archive").unwrap();
    store
        .execute_script(
            "CREATE TABLE hV37_vD1 (Timestamp INTEGER PRIMARY KEY, Project TEXT);
             CREATE TABLE fV66_vD1 (Timestamp INTEGER PRIMARY KEY, Ante_Cont_AzimuthPositionCorrected REAL);
             CREATE TABLE abin (Id INTEGER PRIMARY KEY, Timestamp REAL, Description TEXT, Bin BLOB);",
        )
        .unwrap();
    Arc::new(store)
}

fn destination_store(name: &str) -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory(name).unwrap();
    store
        .execute_script(
            "CREATE TABLE hV37_vD1 (Timestamp INTEGER PRIMARY KEY, Project TEXT);
             CREATE TABLE fV66_vD1 (Timestamp INTEGER PRIMARY KEY, Ante_Cont_AzimuthPositionCorre REAL);
             CREATE TABLE abin (Id INTEGER PRIMARY KEY, Timestamp REAL, Description TEXT, Bin BLOB);",
        )
        .unwrap();
    Arc::new(store)
}

fn seed_days(store: &SqliteStore, days: std::ops::RangeInclusive<i64>) {
    let mut sql = String::new();
    for day in days {
        sql.push_str(&format!(
            "INSERT INTO hV37_vD1 VALUES ({}, 'NormalObserving');",
            Timestamp::from_days(day).0
        ));
    }
    store.execute_script(&sql).unwrap();
}

fn seed_abin(store: &SqliteStore, ids: std::ops::RangeInclusive<i64>) {
    let mut sql = String::new();
    for id in ids {
        sql.push_str(&format!(
            "INSERT INTO abin VALUES ({}, 3797323200.5, 'DCM', x'0102');",
            id
        ));
    }
    store.execute_script(&sql).unwrap();
}

async fn count(store: &SqliteStore, table: &str) -> i64 {
    store
        .execute_query(&format!("SELECT COUNT(*) AS n FROM {}", table))
        .await
        .unwrap()
        .first_i64("n")
        .unwrap()
}

fn synchronizer(source: Arc<SqliteStore>, planner: ChunkPlanner) -> Synchronizer {
    Synchronizer::new(
        source,
        Arc::new(SchemaCatalog::from_text(SCHEMA)),
        planner,
        Timeouts::default(),
        100,
    )
}

fn table(name: &str) -> TableDescriptor {
    TableDescriptor::new(name).unwrap()
}

#[tokio::test]
async fn test_monthly_table_catches_up_in_thirty_day_windows() {
    let source = source_store();
    seed_days(&source, 10..=100);
    let dest = destination_store("cloud");
    seed_days(&dest, 10..=40);

    let sync = synchronizer(source, ChunkPlanner::new(None));
    let report = sync.sync_table(&table("hV37_vD1"), dest.as_ref(), None).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(
        report.range,
        Some(TransferRange::time_through(
            Timestamp::from_days(40),
            Timestamp::from_days(100)
        ))
    );
    let chunks: Vec<TransferRange> = report.chunks.iter().map(|c| c.range).collect();
    assert_eq!(
        chunks,
        vec![
            TransferRange::time(Timestamp::from_days(40), Timestamp::from_days(70)),
            // Only the last window includes the source watermark row.
            TransferRange::time_through(Timestamp::from_days(70), Timestamp::from_days(100)),
        ]
    );
    assert_eq!(report.rows_written(), 60);
    assert_eq!(count(&dest, "hV37_vD1").await, 91);

    let hv = table("hV37_vD1");
    let after = watermark::latest(dest.as_ref(), &hv, Timeouts::default().probe)
        .await
        .unwrap();
    assert_eq!(after, Some(Watermark::Time(Timestamp::from_days(100))));
}

#[tokio::test]
async fn test_abin_transfers_above_destination_max_id() {
    let source = source_store();
    seed_abin(&source, 1..=530);
    let dest = destination_store("cloud");
    seed_abin(&dest, 1..=500);

    let sync = synchronizer(source, ChunkPlanner::new(None));
    let report = sync.sync_table(&table("abin"), dest.as_ref(), None).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.range, Some(TransferRange::id_floor(500)));
    assert_eq!(report.chunks.len(), 1);
    assert_eq!(report.chunks[0].rows_written, 30);
    assert_eq!(report.chunks[0].batches_committed, 1);
    assert_eq!(count(&dest, "abin").await, 530);
}

#[tokio::test]
async fn test_replayed_range_adds_only_new_rows() {
    let source = source_store();
    seed_days(&source, 1..=20);
    let dest = destination_store("cloud");
    let sync = synchronizer(source, ChunkPlanner::new(None));
    let hv = table("hV37_vD1");

    let first = TransferRange::time(Timestamp::from_days(1), Timestamp::from_days(11));
    let overlapping = TransferRange::time(Timestamp::from_days(5), Timestamp::from_days(21));

    let a = sync.sync_table(&hv, dest.as_ref(), Some(first)).await;
    assert_eq!(a.rows_written(), 10);
    let b = sync.sync_table(&hv, dest.as_ref(), Some(overlapping)).await;
    assert!(b.is_success());
    assert_eq!(b.rows_written(), 10);
    let c = sync.sync_table(&hv, dest.as_ref(), Some(overlapping)).await;
    assert!(c.is_success());
    assert_eq!(c.rows_written(), 0);
    assert_eq!(count(&dest, "hV37_vD1").await, 20);
}

#[tokio::test]
async fn test_watermark_never_decreases_across_syncs() {
    let source = source_store();
    seed_days(&source, 1..=50);
    let dest = destination_store("cloud");
    seed_days(&dest, 1..=5);
    let sync = synchronizer(Arc::clone(&source), ChunkPlanner::new(None));
    let hv = table("hV37_vD1");
    let probe = Timeouts::default().probe;

    let mut previous = watermark::latest(dest.as_ref(), &hv, probe).await.unwrap();
    for extra in [60, 61, 90] {
        seed_days(&source, extra..=extra);
        let report = sync.sync_table(&hv, dest.as_ref(), None).await;
        assert!(report.is_success());
        let now = watermark::latest(dest.as_ref(), &hv, probe).await.unwrap();
        assert!(now >= previous);
        assert_eq!(now, Some(Watermark::Time(Timestamp::from_days(extra))));
        previous = now;
    }
}

#[tokio::test]
async fn test_daily_table_follows_scan_index_files() {
    let day1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let day3 = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
    let base1 = start_of_day(day1).0;
    let base3 = start_of_day(day3).0;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("IFDB20240501.txt"),
        format!(
            "SCANID\tST_TS\tEN_TS\n240501000000\t{}\t{}\n240501120000\t{}\t{}\n\t{}\t{}\n",
            base1,
            base1 + 43_199,
            base1 + 43_200,
            base1 + 86_398,
            base1 + 86_399,
            base1 + 86_399
        ),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("IFDB20240503.txt"),
        format!(
            "SCANID\tST_TS\tEN_TS\n240503000000\t{}\t{}\n",
            base3,
            base3 + 86_399
        ),
    )
    .unwrap();

    let source = source_store();
    let mut seed = String::new();
    for ts in [base1 + 10, base1 + 50_000, base3 + 100] {
        seed.push_str(&format!("INSERT INTO fV66_vD1 VALUES ({}, 1.5);", ts));
    }
    source.execute_script(&seed).unwrap();
    let dest = destination_store("cloud");

    let planner = ChunkPlanner::new(Some(Arc::new(ScanIndexDir::new(dir.path()))));
    let sync = synchronizer(source, planner);
    let range = TransferRange::time(start_of_day(day1), start_of_day(day3).plus_days(1));
    let report = sync
        .sync_table(&table("fV66_vD1"), dest.as_ref(), Some(range))
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    let chunks: Vec<TransferRange> = report.chunks.iter().map(|c| c.range).collect();
    assert_eq!(
        chunks,
        vec![
            TransferRange::time(Timestamp(base1), Timestamp(base1 + 43_200)),
            TransferRange::time(Timestamp(base1 + 43_200), Timestamp(base1 + 86_399)),
            TransferRange::time(Timestamp(base3), Timestamp(base3 + 86_400)),
        ]
    );
    // 2024-05-02 has no index file.
    assert_eq!(report.skipped_days.len(), 1);
    assert_eq!(
        report.skipped_days[0].day,
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    );
    assert_eq!(report.rows_written(), 3);

    // The destination keeps the truncated column name.
    let rs = dest
        .execute_query("SELECT Ante_Cont_AzimuthPositionCorre FROM fV66_vD1")
        .await
        .unwrap();
    assert_eq!(rs.row_count(), 3);
}

#[tokio::test]
async fn test_dry_run_plans_without_writing() {
    let source = source_store();
    seed_days(&source, 10..=100);
    let dest = destination_store("cloud");
    seed_days(&dest, 10..=40);

    let sync = synchronizer(source, ChunkPlanner::new(None)).with_options(SyncOptions {
        dry_run: true,
        parallel_destinations: false,
    });
    let report = sync.sync_table(&table("hV37_vD1"), dest.as_ref(), None).await;

    assert!(report.dry_run);
    assert_eq!(report.planned.len(), 2);
    assert!(report.chunks.is_empty());
    assert_eq!(count(&dest, "hV37_vD1").await, 31);
}

#[tokio::test]
async fn test_unreachable_destination_does_not_block_siblings() {
    let source = source_store();
    seed_days(&source, 1..=10);
    seed_abin(&source, 1..=3);
    let down: Arc<dyn Store> = Arc::new(UnreachableStore::new(
        "site",
        Dialect::MySql,
        "connection refused",
    ));
    let cloud = destination_store("cloud");
    let backup = destination_store("backup");
    let destinations: Vec<Arc<dyn Store>> = vec![cloud.clone() as Arc<dyn Store>, down, backup.clone()];

    for parallel in [false, true] {
        let sync = synchronizer(Arc::clone(&source), ChunkPlanner::new(None)).with_options(
            SyncOptions {
                dry_run: false,
                parallel_destinations: parallel,
            },
        );
        let summary = sync
            .sync_all(&[table("hV37_vD1"), table("abin")], &destinations)
            .await;

        assert_eq!(summary.reports.len(), 6);
        assert_eq!(summary.errors.len(), 2);
        for report in &summary.reports {
            if report.destination == "site" {
                let error = report.error.as_ref().unwrap();
                assert!(matches!(error, SyncError::DestinationUnavailable { .. }));
                assert!(error.is_retryable());
            } else {
                assert!(report.is_success(), "{:?}", report.error);
            }
        }
    }

    assert_eq!(count(&cloud, "hV37_vD1").await, 10);
    assert_eq!(count(&backup, "abin").await, 3);
}
