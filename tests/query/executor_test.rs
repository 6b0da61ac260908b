#[path = "../common/mod.rs"]
mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use bqmeta::error::ServiceError;
use bqmeta::metadata::{Column, ColumnMode};
use bqmeta::query::{ExecutionFailure, ExecutorConfig, QueryExecutor};
use common::{wire_row, FakeWarehouse, PROJECT};

const GIB: u64 = 1024 * 1024 * 1024;

fn config() -> ExecutorConfig {
    ExecutorConfig {
        max_scan_bytes: GIB,
        default_limit: 10,
        timeout: Duration::from_secs(5),
        export_root: PathBuf::from("exports"),
        default_project: Some(PROJECT.to_string()),
    }
}

fn executor(fake: &Arc<FakeWarehouse>, config: ExecutorConfig) -> QueryExecutor {
    QueryExecutor::new(fake.clone(), config)
}

fn order_rows(n: usize) -> FakeWarehouse {
    let schema = vec![
        Column::new("order_id", "INTEGER").with_mode(ColumnMode::Required),
        Column::new("placed_at", "TIMESTAMP"),
        Column::new("paid", "BOOLEAN"),
    ];
    let rows = (0..n)
        .map(|i| {
            let id = (i + 1).to_string();
            wire_row(&[Some(id.as_str()), Some("1700000000"), Some("true")])
        })
        .collect();
    FakeWarehouse::sales().with_rows(schema, rows)
}

#[tokio::test]
async fn test_scan_budget_blocks_execution_without_force() {
    let fake = Arc::new(order_rows(3).with_dry_run_bytes(2 * GIB));
    let result = executor(&fake, config())
        .execute_query("SELECT * FROM sales.orders", None, false)
        .await;

    assert!(!result.success);
    assert_eq!(
        result.failure,
        Some(ExecutionFailure::ScanLimitExceeded {
            estimated: 2 * GIB,
            limit: GIB,
        })
    );
    assert_eq!(
        result.error_message.as_deref(),
        Some("Query scan amount exceeds limit. Expected scan amount: 2147483648 bytes, Limit: 1073741824 bytes")
    );
    assert_eq!(fake.dry_run_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fake.run_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_force_runs_over_budget_query() {
    let fake = Arc::new(order_rows(3).with_dry_run_bytes(2 * GIB));
    let result = executor(&fake, config())
        .execute_query("SELECT * FROM sales.orders", None, true)
        .await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.row_count, 3);
    assert_eq!(fake.dry_run_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fake.run_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_sql_never_reaches_warehouse() {
    let fake = Arc::new(order_rows(3));
    let result = executor(&fake, config())
        .execute_query("DELETE FROM sales.orders WHERE TRUE", None, true)
        .await;

    assert!(!result.success);
    match result.failure {
        Some(ExecutionFailure::Rejected { reason }) => assert!(reason.contains("DELETE")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn test_rows_capped_and_converted() {
    let fake = Arc::new(order_rows(7).with_page_size(2));
    let mut config = config();
    config.default_limit = 3;

    let result = executor(&fake, config)
        .execute_query("SELECT * FROM sales.orders LIMIT 500", None, false)
        .await;

    assert!(result.success);
    assert!(result.sql.ends_with("LIMIT 3"));
    assert_eq!(result.original_limit, Some(500));
    assert_eq!(result.applied_limit, Some(3));
    assert!(result.limit_was_modified);
    assert_eq!(result.row_count, 3);
    assert_eq!(result.job_id.as_deref(), Some("job-1"));
    assert_eq!(result.project_id.as_deref(), Some(PROJECT));

    let first = serde_json::to_value(&result.rows[0]).unwrap();
    assert_eq!(
        first,
        json!({"order_id": 1, "placed_at": "2023-11-14T22:13:20Z", "paid": true})
    );
    assert_eq!(result.schema.len(), 3);
}

#[tokio::test]
async fn test_timeout_returns_failure_and_cancels_job() {
    let fake = Arc::new(order_rows(4).with_query_delay(Duration::from_millis(500)));
    let mut config = config();
    config.timeout = Duration::from_millis(100);

    let started = std::time::Instant::now();
    let result = executor(&fake, config)
        .execute_query("SELECT * FROM sales.orders", None, false)
        .await;

    assert!(started.elapsed() < Duration::from_millis(450));
    assert!(!result.success);
    assert!(matches!(result.failure, Some(ExecutionFailure::Timeout { .. })));
    assert_eq!(result.job_id.as_deref(), Some("job-1"));
    assert_eq!(fake.cancel_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_while_job_runs_cancels_it() {
    let fake = Arc::new(order_rows(4).with_job_delay(Duration::from_millis(500)));
    let mut config = config();
    config.timeout = Duration::from_millis(100);

    let result = executor(&fake, config)
        .execute_query("SELECT * FROM sales.orders", None, false)
        .await;

    assert_eq!(result.failure, Some(ExecutionFailure::Timeout { seconds: 1 }));
    assert_eq!(
        result.error_message.as_deref(),
        Some("Query timed out after 1 seconds")
    );
    assert_eq!(result.job_id.as_deref(), Some("job-1"));
    assert_eq!(fake.cancel_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dry_run_failure_is_remote_failure() {
    let fake = Arc::new(order_rows(1));
    fake.set_fail_dry_run(true);

    let result = executor(&fake, config())
        .execute_query("SELECT nope FROM sales.orders", None, false)
        .await;

    match result.failure {
        Some(ExecutionFailure::Remote { message }) => assert!(message.contains("Unrecognized name")),
        other => panic!("expected remote failure, got {other:?}"),
    }
    assert_eq!(fake.run_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_explicit_project_wins() {
    let fake = Arc::new(order_rows(1));
    let result = executor(&fake, config())
        .execute_query("SELECT 1", Some("other-project"), false)
        .await;
    assert_eq!(result.project_id.as_deref(), Some("other-project"));
}

#[tokio::test]
async fn test_check_scan_amount_reports_budget() {
    let fake = Arc::new(FakeWarehouse::sales().with_dry_run_bytes(512));
    let result = executor(&fake, config())
        .check_scan_amount("SELECT * FROM sales.orders LIMIT 99999", None)
        .await
        .unwrap();

    assert!(result.valid);
    assert!(result.within_limit);
    assert_eq!(result.total_bytes_processed, 512);
    assert_eq!(result.max_scan_bytes, GIB);
    // Dry runs never rewrite the LIMIT.
    assert_eq!(result.sql, "SELECT * FROM sales.orders LIMIT 99999");
    assert_eq!(fake.run_calls.load(Ordering::SeqCst), 0);

    let fake = Arc::new(FakeWarehouse::sales().with_dry_run_bytes(2 * GIB));
    let result = executor(&fake, config())
        .check_scan_amount("SELECT * FROM sales.orders", None)
        .await
        .unwrap();
    assert!(result.valid);
    assert!(!result.within_limit);
}

#[tokio::test]
async fn test_check_scan_amount_rejects_unsafe_sql() {
    let fake = Arc::new(FakeWarehouse::sales());
    let err = executor(&fake, config())
        .check_scan_amount("DROP TABLE sales.orders", None)
        .await
        .unwrap_err();

    match err {
        ServiceError::QueryRejected { reason } => assert!(reason.contains("DROP")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn test_check_scan_amount_reports_dry_run_error() {
    let fake = Arc::new(FakeWarehouse::sales());
    fake.set_fail_dry_run(true);

    let result = executor(&fake, config())
        .check_scan_amount("SELECT nope FROM sales.orders", None)
        .await
        .unwrap();

    assert!(!result.valid);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("Unrecognized name"));
}
