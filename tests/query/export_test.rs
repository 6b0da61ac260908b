#[path = "../common/mod.rs"]
mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use bqmeta::error::ServiceError;
use bqmeta::metadata::Column;
use bqmeta::query::{ExecutorConfig, ExportFormat, QueryExecutor};
use common::{wire_row, FakeWarehouse, PROJECT};

const GIB: u64 = 1024 * 1024 * 1024;

fn executor(fake: &Arc<FakeWarehouse>, root: &Path) -> QueryExecutor {
    QueryExecutor::new(
        fake.clone(),
        ExecutorConfig {
            max_scan_bytes: GIB,
            default_limit: 2,
            timeout: Duration::from_secs(5),
            export_root: root.to_path_buf(),
            default_project: Some(PROJECT.to_string()),
        },
    )
}

/// Five customer rows; row 3 has a name that needs CSV quoting.
fn customers() -> FakeWarehouse {
    let schema = vec![
        Column::new("id", "INTEGER"),
        Column::new("name", "STRING"),
        Column::new("city", "STRING"),
    ];
    let rows = vec![
        wire_row(&[Some("1"), Some("Ada"), Some("London")]),
        wire_row(&[Some("2"), Some("Grace"), None]),
        wire_row(&[Some("3"), Some("Smith, \"Jo\""), Some("Oslo")]),
        wire_row(&[Some("4"), Some("Linus"), Some("Helsinki")]),
        wire_row(&[Some("5"), Some("Barbara"), Some("Boston")]),
    ];
    FakeWarehouse::sales().with_rows(schema, rows).with_page_size(2)
}

fn visible_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_traversal_rejected_before_any_warehouse_call() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers());

    let err = executor(&fake, root.path())
        .save_query_result(
            "SELECT * FROM sales.customers",
            "../../etc/passwd",
            ExportFormat::Csv,
            None,
            true,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidPath(_)));
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn test_csv_export_with_header() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers());

    let descriptor = executor(&fake, root.path())
        .save_query_result(
            "SELECT * FROM sales.customers",
            "reports/customers.csv",
            ExportFormat::Csv,
            None,
            true,
        )
        .await
        .unwrap();

    // No LIMIT is injected for exports.
    assert_eq!(descriptor.rows_written, 5);
    assert_eq!(descriptor.job_id.as_deref(), Some("job-1"));
    assert!(descriptor.path.ends_with("reports/customers.csv"));

    let text = std::fs::read_to_string(&descriptor.path).unwrap();
    assert_eq!(descriptor.bytes_written, text.len() as u64);
    let lines: Vec<&str> = text.split_terminator("\r\n").collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "id,name,city");
    assert_eq!(lines[1], "1,Ada,London");
    assert_eq!(lines[2], "2,Grace,");
    assert_eq!(lines[3], "3,\"Smith, \"\"Jo\"\"\",Oslo");

    assert_eq!(
        visible_files(&root.path().join("reports")),
        vec!["customers.csv"]
    );
}

#[tokio::test]
async fn test_csv_export_without_header() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers());

    let descriptor = executor(&fake, root.path())
        .save_query_result("SELECT * FROM t", "plain.csv", ExportFormat::Csv, None, false)
        .await
        .unwrap();

    let text = std::fs::read_to_string(&descriptor.path).unwrap();
    assert_eq!(text.split_terminator("\r\n").count(), 5);
    assert!(text.starts_with("1,Ada,London\r\n"));
}

#[tokio::test]
async fn test_jsonl_export_one_object_per_line() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers());

    let descriptor = executor(&fake, root.path())
        .save_query_result("SELECT * FROM t", "out.jsonl", ExportFormat::Jsonl, None, true)
        .await
        .unwrap();

    let text = std::fs::read_to_string(&descriptor.path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    for line in &lines {
        let value: Value = serde_json::from_str(line).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
    }
    assert_eq!(lines[1], r#"{"id":2,"name":"Grace","city":null}"#);
}

#[tokio::test]
async fn test_over_budget_export_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers().with_dry_run_bytes(3 * GIB));

    let err = executor(&fake, root.path())
        .save_query_result("SELECT * FROM t", "big.csv", ExportFormat::Csv, None, true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::ScanLimitExceeded {
            estimated,
            limit: GIB
        } if estimated == 3 * GIB
    ));
    assert_eq!(fake.run_calls.load(Ordering::SeqCst), 0);
    assert!(visible_files(root.path()).is_empty());
}

#[tokio::test]
async fn test_unsafe_export_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers());

    let err = executor(&fake, root.path())
        .save_query_result("TRUNCATE TABLE t", "x.csv", ExportFormat::Csv, None, true)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::QueryRejected { .. }));
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn test_export_timeout_cancels_running_job() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers().with_job_delay(Duration::from_millis(500)));
    let config = ExecutorConfig {
        timeout: Duration::from_millis(100),
        ..executor(&fake, root.path()).config().clone()
    };

    let err = QueryExecutor::new(fake.clone(), config)
        .save_query_result("SELECT * FROM t", "slow.csv", ExportFormat::Csv, None, true)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::ExecutionTimeout { seconds: 1 }));
    assert_eq!(fake.cancel_calls.load(Ordering::SeqCst), 1);
    assert!(visible_files(root.path()).is_empty());
}

#[tokio::test]
async fn test_failed_stream_leaves_no_file() {
    let root = tempfile::tempdir().unwrap();
    let fake = Arc::new(customers().with_failing_page_after(1));

    let err = executor(&fake, root.path())
        .save_query_result("SELECT * FROM t", "partial.csv", ExportFormat::Csv, None, true)
        .await
        .unwrap_err();

    match err {
        ServiceError::RemoteGateway(message) => assert!(message.contains("page fetch failed")),
        other => panic!("expected gateway error, got {other:?}"),
    }
    assert!(visible_files(root.path()).is_empty());
}
