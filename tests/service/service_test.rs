#[path = "../common/mod.rs"]
mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bqmeta::cache::{CacheManager, CacheOptions, EnvelopeStore};
use bqmeta::error::ServiceError;
use bqmeta::metadata::{Column, Dataset, Table, TableRef};
use bqmeta::query::{ExecutorConfig, QueryExecutor};
use bqmeta::service::{markdown, MetadataService};
use common::{FakeWarehouse, PROJECT};

const BILLING: &str = "billing";

fn service(fake: &Arc<FakeWarehouse>, dir: &Path) -> MetadataService {
    let projects = vec![PROJECT.to_string(), BILLING.to_string()];
    let cache = CacheManager::new(
        fake.clone(),
        EnvelopeStore::at(dir.join("cache").join("envelope.json")),
        CacheOptions {
            project_ids: projects.clone(),
            filters: Vec::new(),
            ttl_seconds: 3600,
            fetch_concurrency: 4,
        },
    );
    let executor = QueryExecutor::new(
        fake.clone(),
        ExecutorConfig {
            max_scan_bytes: 1024 * 1024,
            default_limit: 10,
            timeout: Duration::from_secs(5),
            export_root: dir.join("exports"),
            default_project: Some(PROJECT.to_string()),
        },
    );
    MetadataService::new(Arc::new(cache), executor, projects)
}

fn warehouse() -> FakeWarehouse {
    let fake = FakeWarehouse::sales();
    fake.add_dataset(
        Dataset::new(BILLING, "invoices").with_description("Customer invoices"),
        vec![Table::new(
            TableRef::new(BILLING, "invoices", "lines"),
            vec![Column::new("invoice_id", "STRING")],
        )],
    );
    fake
}

#[tokio::test]
async fn test_get_datasets_is_stable_across_calls() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    let first = service.get_datasets().await.unwrap();
    let second = service.get_datasets().await.unwrap();

    let ids: Vec<(&str, &str)> = first
        .iter()
        .map(|d| (d.project_id.as_str(), d.dataset_id.as_str()))
        .collect();
    assert_eq!(
        ids,
        vec![
            ("analytics", "marketing"),
            ("analytics", "sales"),
            ("billing", "invoices")
        ]
    );
    assert_eq!(first, second);
    assert_eq!(fake.fetches(), 2, "one listing per project, no refetch");
}

#[tokio::test]
async fn test_get_datasets_by_project() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    let billing = service.get_datasets_by_project(BILLING).await.unwrap();
    assert_eq!(billing.len(), 1);
    assert_eq!(billing[0].dataset_id, "invoices");

    assert!(service
        .get_datasets_by_project("nobody")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_get_tables_searches_configured_projects() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    let tables = service.get_tables("invoices", None).await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].table_id(), "lines");

    let sales = service.get_tables("sales", Some(PROJECT)).await.unwrap();
    let names: Vec<&str> = sales.iter().map(|t| t.table_id()).collect();
    assert!(names.contains(&"orders"));
    assert!(names.contains(&"customers"));
}

#[tokio::test]
async fn test_get_tables_unknown_dataset_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    let err = service.get_tables("missing", None).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert_eq!(err.code(), "NOT_FOUND");

    // Known dataset, wrong project.
    let err = service.get_tables("sales", Some(BILLING)).await.unwrap_err();
    match err {
        ServiceError::NotFound(what) => assert_eq!(what, "dataset billing.sales"),
        other => panic!("expected not found, got {other:?}"),
    }
}

#[tokio::test]
async fn test_search_ignores_case() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    let lower = service.search_metadata("cust").await.unwrap();
    let upper = service.search_metadata("CUST").await.unwrap();

    assert!(!lower.is_empty());
    assert_eq!(lower, upper);
    let paths: Vec<&str> = lower
        .iter()
        .map(|h| h.document.qualified_path.as_str())
        .collect();
    assert!(paths.contains(&"analytics.sales.customers"));
    assert!(paths.contains(&"billing.invoices"));
}

#[tokio::test]
async fn test_unknown_export_format_makes_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    let err = service
        .save_query_result("SELECT 1", "out.parquet", "parquet", None, true)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::UnsupportedFormat(_)));
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn test_refresh_cache_refetches_and_summarizes() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    service.get_datasets().await.unwrap();
    let summary = service.refresh_cache().await.unwrap();

    assert_eq!(summary.projects, 2);
    assert_eq!(summary.datasets, 3);
    assert_eq!(summary.tables, 4);
    assert_eq!(fake.fetches(), 4);
}

#[tokio::test]
async fn test_markdown_render_of_service_results() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(warehouse());
    let service = service(&fake, dir.path());

    let datasets = markdown::render_datasets(&service.get_datasets().await.unwrap());
    assert!(datasets.contains("invoices"));
    assert!(datasets.contains("Customer invoices"));

    let tables = markdown::render_tables(&service.get_tables("sales", None).await.unwrap());
    assert!(tables.contains("address.city"));

    let dry_run = service
        .check_query_scan_amount("SELECT * FROM sales.orders", None)
        .await
        .unwrap();
    assert!(markdown::render_dry_run(&dry_run).contains("1.0 KB"));
}
