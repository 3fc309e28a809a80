use connectors::memory::MemoryDriver;
use connectors::DatabaseDriver;
use dataflow::Dataflow;
use engine::{env::TestSelector, Config, Task, TaskError, TaskStatus, Topology};
use model::core::{
    column::{Column, Columns},
    column_type::ColumnType,
    value::Value,
};
use model::records::{dataset::Dataset, row::Row};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn selected(number: u32) -> bool {
    TestSelector::from_env().matches(number)
}

async fn seed_table(url: &str, table: &str, rows: i64) -> MemoryDriver {
    let driver = MemoryDriver::connect(url);
    let _ = driver.drop_table(table).await;
    driver
        .exec(&format!(
            "create table {table} (\"id\" bigint not null, \"name\" text, \"amount\" numeric)"
        ))
        .await
        .unwrap();

    if rows > 0 {
        let columns = Columns::new(vec![
            Column::new("id", ColumnType::Integer),
            Column::new("name", ColumnType::Text),
            Column::new("amount", ColumnType::Decimal),
        ]);
        let data: Vec<Row> = (0..rows)
            .map(|i| {
                Row::new(vec![
                    Value::Int(i),
                    Value::Text(format!("name{i}")),
                    Value::Decimal((i * 10).into()),
                ])
            })
            .collect();
        let mut dataset = Dataset::from_rows(columns, data);
        dataset.inferred = true;
        let mut flow = Dataflow::from_dataset(dataset, CancellationToken::new()).unwrap();
        driver.bulk_import_flow(table, &mut flow).await.unwrap();
    }
    driver
}

fn task_doc(src_url: &str, stream: &str, tgt_url: &str, object: &str, mode: &str) -> String {
    format!(
        "source: {{conn: '{src_url}', stream: {stream}}}\n\
         target: {{conn: '{tgt_url}', object: {object}}}\n\
         mode: {mode}\n"
    )
}

async fn run_task(doc: &str) -> (Task, Result<(), TaskError>) {
    let cfg = Config::from_str(doc).unwrap();
    let mut task = Task::new(cfg).unwrap();
    let result = task.execute().await;
    (task, result)
}

async fn assert_no_staged_tables(url: &str) {
    let driver = MemoryDriver::connect(url);
    let tables = driver.list_tables("").await.unwrap();
    assert!(
        tables.iter().all(|t| !t.contains("_tmp")),
        "staged table leaked: {tables:?}"
    );
}

// Small full refresh between two databases: the final table carries
// exactly the source row count, and re-running reproduces it.
#[traced_test]
#[tokio::test]
async fn tc01_db_to_db_full_refresh() {
    if !selected(1) {
        return;
    }
    let src_url = "memory://tc01_src";
    let tgt_url = "memory://tc01_tgt";
    seed_table(src_url, "t1k", 1000).await;

    let doc = task_doc(src_url, "t1k", tgt_url, "t1k", "full-refresh");
    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.topology, Topology::DbToDb);
    assert_eq!(task.count(), 1000);

    let tgt = MemoryDriver::connect(tgt_url);
    assert_eq!(tgt.get_count("t1k").await.unwrap(), 1000);
    let columns = tgt.get_columns("t1k").await.unwrap();
    assert_eq!(columns.get("id").unwrap().ctype, ColumnType::Integer);

    // drop-mode runs are idempotent
    let (_, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(tgt.get_count("t1k").await.unwrap(), 1000);
    assert_no_staged_tables(tgt_url).await;
}

// CSV to database upsert: first run inserts every row, a second run
// over the identical file affects nothing.
#[tokio::test]
async fn tc02_csv_to_db_upsert() {
    if !selected(2) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("dataset.csv");
    let mut body = String::from("id,name,amount\n");
    for i in 0..100 {
        body.push_str(&format!("{i},name{i},{}\n", i * 10));
    }
    std::fs::write(&csv_path, body).unwrap();

    let tgt_url = "memory://tc02_tgt";
    let doc = format!(
        "source: {{conn: '{}', primary_key: [id], update_key: id}}\n\
         target: {{conn: '{tgt_url}', object: test1k_csv}}\n\
         mode: upsert\n",
        csv_path.display()
    );

    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(task.topology, Topology::FileToDb);
    assert_eq!(task.count(), 100);

    let tgt = MemoryDriver::connect(tgt_url);
    assert_eq!(tgt.get_count("test1k_csv").await.unwrap(), 100);

    // identical second run: zero rows affected, target unchanged
    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert!(
        task.progress
            .history()
            .iter()
            .any(|p| p.starts_with("0 inserts / updates")),
        "second run should affect no rows: {:?}",
        task.progress.history()
    );
    assert_eq!(tgt.get_count("test1k_csv").await.unwrap(), 100);
    assert_no_staged_tables(tgt_url).await;
}

// Database to file: every row lands under the prefix and no path
// carries an empty segment.
#[tokio::test]
async fn tc03_db_to_file() {
    if !selected(3) {
        return;
    }
    let src_url = "memory://tc03_src";
    seed_table(src_url, "t1k", 1000).await;

    let dir = tempfile::tempdir().unwrap();
    let out_prefix = format!("file://{}/out/t1k/", dir.path().display());
    let doc = format!(
        "source: {{conn: '{src_url}', stream: t1k}}\ntarget: {{conn: '{out_prefix}'}}\n"
    );

    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(task.topology, Topology::DbToFile);
    assert_eq!(task.count(), 1000);

    let listed = connectors::registry::filesystem_for_scheme("file")
        .unwrap()
        .list(&out_prefix)
        .await
        .unwrap();
    assert!(!listed.is_empty(), "no objects written under the prefix");
    for path in &listed {
        let rest = path.split_once("://").map(|(_, r)| r).unwrap_or(path);
        assert!(!rest.contains("//"), "path has empty segment: {path}");
    }

    let content = std::fs::read_to_string(
        listed[0].strip_prefix("file://").unwrap(),
    )
    .unwrap();
    assert_eq!(content.lines().count(), 1001, "header plus 1000 rows");
}

// Discovery with column_level returns the expected columns and nothing
// from filtered-out tables.
#[tokio::test]
async fn tc04_discover_column_level() {
    if !selected(4) {
        return;
    }
    let url = "memory://tc04";
    seed_table(url, "crm.orders", 5).await;
    let driver = MemoryDriver::connect(url);
    let _ = driver.drop_table("other.ignored").await;
    driver
        .exec("create table other.ignored (\"secret\" text)")
        .await
        .unwrap();

    let doc = format!(
        "mode: discover\n\
         source: {{conn: '{url}', options: {{column_level: 'true', recursive: 'true', filter: 'crm.*'}}}}\n"
    );
    let cfg = Config::from_str(&doc).unwrap();
    let mut task = Task::new(cfg).unwrap();
    task.execute().await.unwrap();
    assert_eq!(task.topology, Topology::Discover);

    let conn = connectors::ConnInfo::from_url(url).unwrap();
    let options = engine::discover::DiscoverOptions {
        filter: Some("crm.*".to_string()),
        column_level: true,
        recursive: true,
    };
    let found = engine::discover::discover(&conn, &options, CancellationToken::new())
        .await
        .unwrap();

    let all_columns: Vec<String> = found
        .schemata
        .iter()
        .flat_map(|e| e.columns.names())
        .collect();
    for expected in ["id", "name", "amount"] {
        assert!(all_columns.contains(&expected.to_string()), "{expected} missing");
    }
    assert!(!all_columns.contains(&"secret".to_string()));
}

// A target that silently truncates wide text must fail the run when
// checksum failures are fatal, leaving the final table unchanged.
#[tokio::test]
async fn tc05_checksum_failure_is_fatal() {
    if !selected(5) {
        return;
    }
    let src_url = "memory://tc05_src";
    let tgt_url = "memory://tc05_tgt?simulate_text_truncation=4";
    seed_table(src_url, "wide", 0).await;

    // wide text values that will not survive the truncating target
    let src = MemoryDriver::connect(src_url);
    let columns = Columns::new(vec![
        Column::new("id", ColumnType::Integer),
        Column::new("payload", ColumnType::Text),
    ]);
    let _ = src.drop_table("wide").await;
    src.exec("create table wide (\"id\" bigint, \"payload\" text)")
        .await
        .unwrap();
    let rows: Vec<Row> = (0..20)
        .map(|i| Row::new(vec![Value::Int(i), Value::Text("x".repeat(64))]))
        .collect();
    let mut dataset = Dataset::from_rows(columns, rows);
    dataset.inferred = true;
    let mut flow = Dataflow::from_dataset(dataset, CancellationToken::new()).unwrap();
    src.bulk_import_flow("wide", &mut flow).await.unwrap();

    let doc = format!(
        "source: {{conn: '{src_url}', stream: wide}}\n\
         target: {{conn: '{tgt_url}', object: wide}}\n\
         mode: append\n\
         ERROR_ON_CHECKSUM_FAILURE: '1'\n"
    );
    let (task, result) = run_task(&doc).await;
    match result {
        Err(TaskError::ChecksumFailure(_)) => {}
        other => panic!("expected checksum failure, got {other:?}"),
    }
    assert_eq!(task.status, TaskStatus::Error);

    let tgt = MemoryDriver::connect(tgt_url);
    assert!(!tgt.table_exists("wide").await.unwrap(), "final must stay untouched");
    assert_no_staged_tables(tgt_url).await;
}

// Cancelling a long transfer interrupts within the grace period,
// drops the staged table and leaves the final object unchanged.
#[traced_test]
#[tokio::test]
async fn tc06_cancellation() {
    if !selected(6) {
        return;
    }
    let src_url = "memory://tc06_src?export_delay_us=500";
    let tgt_url = "memory://tc06_tgt";
    seed_table(src_url, "big", 100_000).await;

    let doc = task_doc(src_url, "big", tgt_url, "big", "append");
    let cfg = Config::from_str(&doc).unwrap();
    let mut task = Task::new(cfg).unwrap();
    let cancel = task.cancellation();

    let handle = tokio::spawn(async move {
        let result = task.execute().await;
        (task, result)
    });

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    cancel.cancel();
    let started = std::time::Instant::now();
    let (task, result) = handle.await.unwrap();
    assert!(
        started.elapsed() < std::time::Duration::from_secs(4),
        "cancellation exceeded the grace period"
    );

    match result {
        Err(err) if err.is_interrupted() => {}
        other => panic!("expected interruption, got {other:?}"),
    }
    assert_eq!(task.status, TaskStatus::Error);

    let tgt = MemoryDriver::connect(tgt_url);
    assert!(!tgt.table_exists("big").await.unwrap(), "final must stay unchanged");
    assert_no_staged_tables(tgt_url).await;
}

// An empty source still succeeds and creates the final table.
#[tokio::test]
async fn tc07_empty_source() {
    if !selected(7) {
        return;
    }
    let src_url = "memory://tc07_src";
    let tgt_url = "memory://tc07_tgt";
    seed_table(src_url, "empty_t", 0).await;

    let doc = task_doc(src_url, "empty_t", tgt_url, "empty_t", "append");
    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.count(), 0);

    let tgt = MemoryDriver::connect(tgt_url);
    assert!(tgt.table_exists("empty_t").await.unwrap());
    assert_eq!(tgt.get_count("empty_t").await.unwrap(), 0);
    assert_no_staged_tables(tgt_url).await;
}

// A driver that loses rows between stream and staged table trips the
// count invariant.
#[tokio::test]
async fn tc08_row_count_mismatch() {
    if !selected(8) {
        return;
    }
    let src_url = "memory://tc08_src";
    let tgt_url = "memory://tc08_tgt?simulate_row_loss=10";
    seed_table(src_url, "t", 100).await;

    let doc = task_doc(src_url, "t", tgt_url, "t", "append");
    let (task, result) = run_task(&doc).await;
    match result {
        Err(TaskError::RowCountMismatch { stream, table }) => {
            assert_eq!(stream, 100);
            assert!(table < stream);
        }
        other => panic!("expected row count mismatch, got {other:?}"),
    }
    assert_eq!(task.status, TaskStatus::Error);
    assert_no_staged_tables(tgt_url).await;
}

// Truncate mode refills the final table without recreating it.
#[tokio::test]
async fn tc09_truncate_refill() {
    if !selected(9) {
        return;
    }
    let src_url = "memory://tc09_src";
    let tgt_url = "memory://tc09_tgt";
    seed_table(src_url, "t", 50).await;
    seed_table(tgt_url, "t", 7).await;

    let doc = task_doc(src_url, "t", tgt_url, "t", "truncate");
    let (_, result) = run_task(&doc).await;
    result.unwrap();

    let tgt = MemoryDriver::connect(tgt_url);
    assert_eq!(tgt.get_count("t").await.unwrap(), 50);
    assert_no_staged_tables(tgt_url).await;
}

// A file source with a direct-copy capable target bypasses the row
// pipe and still validates through the staged count.
#[tokio::test]
async fn tc10_direct_copy() {
    if !selected(10) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("direct.csv");
    std::fs::write(&csv_path, "id,name\n1,a\n2,b\n3,c\n").unwrap();

    let tgt_url = "memory://tc10_tgt?direct_copy_schemes=file";
    let doc = format!(
        "source: {{conn: '{}'}}\ntarget: {{conn: '{tgt_url}', object: direct_t}}\n",
        csv_path.display()
    );
    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(task.status, TaskStatus::Success);

    let tgt = MemoryDriver::connect(tgt_url);
    assert_eq!(tgt.get_count("direct_t").await.unwrap(), 3);
    assert_no_staged_tables(tgt_url).await;
}

// Drop mode with swap promotion renames the staged table into place.
#[tokio::test]
async fn tc11_swap_promotion() {
    if !selected(11) {
        return;
    }
    let src_url = "memory://tc11_src";
    let tgt_url = "memory://tc11_tgt";
    seed_table(src_url, "t", 20).await;
    seed_table(tgt_url, "t", 3).await;

    let doc = format!(
        "source: {{conn: '{src_url}', stream: t}}\n\
         target: {{conn: '{tgt_url}', object: t, options: {{use_swap: true}}}}\n\
         mode: drop\n"
    );
    let (_, result) = run_task(&doc).await;
    result.unwrap();

    let tgt = MemoryDriver::connect(tgt_url);
    assert_eq!(tgt.get_count("t").await.unwrap(), 20);
    assert_no_staged_tables(tgt_url).await;
}

// File to file keeps the row order of a single stream.
#[tokio::test]
async fn tc12_file_to_file_order() {
    if !selected(12) {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.csv");
    std::fs::write(&src, "n\n1\n2\n3\n4\n5\n").unwrap();
    let out = dir.path().join("out.csv");

    let doc = format!(
        "source: {{conn: '{}'}}\ntarget: {{conn: 'file://{}'}}\n",
        src.display(),
        out.display()
    );
    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(task.topology, Topology::FileToFile);

    let written = std::fs::read_to_string(&out).unwrap();
    let cells: Vec<&str> = written.lines().skip(1).collect();
    assert_eq!(cells, vec!["1", "2", "3", "4", "5"]);
}

// Raw SQL against the target database, without a source.
#[tokio::test]
async fn tc13_db_sql() {
    if !selected(13) {
        return;
    }
    let tgt_url = "memory://tc13_tgt";
    seed_table(tgt_url, "t", 9).await;

    let doc = format!(
        "target: {{conn: '{tgt_url}', object: t, options: {{post_sql: 'truncate table t'}}}}\n"
    );
    let (task, result) = run_task(&doc).await;
    result.unwrap();
    assert_eq!(task.topology, Topology::DbSql);

    let tgt = MemoryDriver::connect(tgt_url);
    assert_eq!(tgt.get_count("t").await.unwrap(), 0);
}
