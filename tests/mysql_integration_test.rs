// ABOUTME: Integration tests against live MySQL archive databases
// ABOUTME: Run with TEST_MYSQL_SOURCE_URL and TEST_MYSQL_TARGET_URL set and --ignored

use archive_replicator::config::Timeouts;
use archive_replicator::schema::SchemaCatalog;
use archive_replicator::store::{MySqlStore, SqliteStore, Store, Value};
use archive_replicator::sync::{ChunkPlanner, Synchronizer};
use archive_replicator::time::Timestamp;
use archive_replicator::{TableDescriptor, TransferRange};
use std::env;
use std::sync::Arc;

const SCHEMA: &str = "\
CREATE TABLE `hV37_vD1` (
  `Timestamp` int(11) NOT NULL,
  `Project` varchar(32) DEFAULT NULL,
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

/// Helper to get test database URLs from environment
fn get_test_urls() -> Option<(String, String)> {
    let source = env::var("TEST_MYSQL_SOURCE_URL").ok()?;
    let target = env::var("TEST_MYSQL_TARGET_URL").ok()?;
    Some((source, target))
}

async fn run(store: &dyn Store, sql: &str) {
    store
        .execute_query(sql)
        .await
        .unwrap_or_else(|e| panic!("{} failed: {}", sql, e));
}

async fn setup_telemetry(store: &dyn Store, days: std::ops::RangeInclusive<i64>) {
    run(store, "DROP TABLE IF EXISTS hV37_vD1").await;
    run(
        store,
        "CREATE TABLE hV37_vD1 (Timestamp INT NOT NULL, Project VARCHAR(32), PRIMARY KEY (Timestamp))",
    )
    .await;
    let rows: Vec<Vec<Value>> = days
        .map(|d| {
            vec![
                Value::Int(Timestamp::from_days(d).0),
                Value::Text("NormalObserving".to_string()),
            ]
        })
        .collect();
    store
        .execute_batch("INSERT INTO hV37_vD1 (Timestamp, Project) VALUES (?, ?)", &rows)
        .await
        .expect("Failed to seed hV37_vD1");
}

fn synchronizer(source: Arc<dyn Store>) -> Synchronizer {
    Synchronizer::new(
        source,
        Arc::new(SchemaCatalog::from_text(SCHEMA)),
        ChunkPlanner::new(None),
        Timeouts::default(),
        100,
    )
}

/// Test: a monthly table catches up between two MySQL databases and a replay is a no-op
#[tokio::test]
#[ignore]
async fn test_mysql_to_mysql_catch_up_and_replay() {
    let (source_url, target_url) =
        get_test_urls().expect("TEST_MYSQL_SOURCE_URL and TEST_MYSQL_TARGET_URL must be set");
    let source: Arc<dyn Store> =
        Arc::new(MySqlStore::connect("archive", &source_url).expect("Invalid source URL"));
    let target = MySqlStore::connect("site", &target_url).expect("Invalid target URL");

    setup_telemetry(source.as_ref(), 1..=120).await;
    setup_telemetry(&target, 1..=20).await;

    let sync = synchronizer(Arc::clone(&source));
    let table = TableDescriptor::new("hV37_vD1").unwrap();
    let report = sync.sync_table(&table, &target, None).await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.rows_written(), 100);

    // Re-sending an already transferred range inserts nothing.
    let replay = TransferRange::time(Timestamp::from_days(1), Timestamp::from_days(121));
    let again = sync.sync_table(&table, &target, Some(replay)).await;
    assert!(again.is_success(), "{:?}", again.error);
    assert_eq!(again.rows_written(), 0);
    assert_eq!(again.rows_read(), 120);

    run(source.as_ref(), "DROP TABLE IF EXISTS hV37_vD1").await;
    run(&target, "DROP TABLE IF EXISTS hV37_vD1").await;
}

/// Test: binary records keep their bytes when copied out of MySQL
#[tokio::test]
#[ignore]
async fn test_abin_payload_survives_transfer() {
    let (source_url, _target_url) =
        get_test_urls().expect("TEST_MYSQL_SOURCE_URL and TEST_MYSQL_TARGET_URL must be set");
    let source: Arc<dyn Store> =
        Arc::new(MySqlStore::connect("archive", &source_url).expect("Invalid source URL"));

    run(source.as_ref(), "DROP TABLE IF EXISTS abin").await;
    run(
        source.as_ref(),
        "CREATE TABLE abin (Id INT NOT NULL AUTO_INCREMENT, Timestamp DOUBLE, \
         Description VARCHAR(32), Bin LONGBLOB, PRIMARY KEY (Id))",
    )
    .await;
    let payload = vec![0u8, 159, 146, 150, 255];
    source
        .execute_batch(
            "INSERT INTO abin (Timestamp, Description, Bin) VALUES (?, ?, ?)",
            &[
                vec![
                    Value::Float(3_797_323_200.5),
                    Value::Text("DCM".to_string()),
                    Value::Bytes(payload.clone()),
                ],
                vec![
                    Value::Float(3_797_323_260.5),
                    Value::Text("TPCAL".to_string()),
                    Value::Bytes(payload.clone()),
                ],
            ],
        )
        .await
        .expect("Failed to seed abin");

    let dest = SqliteStore::open_in_memory("cloud").unwrap();
    dest.execute_script(
        "CREATE TABLE abin (Id INTEGER PRIMARY KEY, Timestamp REAL, Description TEXT, Bin BLOB);",
    )
    .unwrap();

    let sync = synchronizer(Arc::clone(&source));
    let report = sync
        .sync_table(&TableDescriptor::new("abin").unwrap(), &dest, None)
        .await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.rows_written(), 2);

    let copied = dest
        .execute_query("SELECT Bin FROM abin ORDER BY Id")
        .await
        .unwrap();
    assert_eq!(
        copied.column("Bin").unwrap(),
        &[Value::Bytes(payload.clone()), Value::Bytes(payload)]
    );

    run(source.as_ref(), "DROP TABLE IF EXISTS abin").await;
}
