//! Scripted in-memory warehouse shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use bqmeta::metadata::{
    Column, ColumnMode, Dataset, DryRunEstimate, MetadataResult, QueryJob, Table, TableRef,
    WarehouseProvider,
};
use bqmeta::worker::WorkerError;

pub const PROJECT: &str = "analytics";

type Catalog = BTreeMap<String, Vec<(Dataset, Vec<Table>)>>;

pub struct FakeWarehouse {
    catalog: Mutex<Catalog>,
    result_schema: Vec<Column>,
    result_rows: Vec<Value>,
    page_size: usize,
    list_delay: Duration,
    query_delay: Duration,
    job_delay: Duration,
    dry_run_bytes: AtomicU64,
    fail_listing: AtomicBool,
    fail_dry_run: AtomicBool,
    fail_after_pages: Option<usize>,

    pub list_dataset_calls: AtomicUsize,
    pub list_table_calls: AtomicUsize,
    pub schema_calls: AtomicUsize,
    pub dry_run_calls: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl FakeWarehouse {
    /// `analytics` project with `sales` (orders, customers) and `marketing`
    /// (campaigns) datasets.
    pub fn sales() -> Self {
        let mut catalog = Catalog::new();
        catalog.insert(
            PROJECT.to_string(),
            vec![
                (
                    Dataset::new(PROJECT, "marketing").with_description("Campaign performance"),
                    vec![table(
                        "marketing",
                        "campaigns",
                        vec![
                            Column::new("campaign_id", "STRING"),
                            Column::new("budget", "NUMERIC"),
                        ],
                    )],
                ),
                (
                    Dataset::new(PROJECT, "sales").with_description("Order data"),
                    vec![
                        table(
                            "sales",
                            "orders",
                            vec![
                                Column::new("order_id", "INTEGER").with_mode(ColumnMode::Required),
                                Column::new("amount", "NUMERIC"),
                                Column::new("placed_at", "TIMESTAMP"),
                            ],
                        ),
                        table(
                            "sales",
                            "customers",
                            vec![
                                Column::new("customer_id", "INTEGER")
                                    .with_mode(ColumnMode::Required),
                                Column::new("name", "STRING"),
                                Column::new("address", "RECORD").with_fields(vec![
                                    Column::new("city", "STRING"),
                                    Column::new("zip", "STRING"),
                                ]),
                            ],
                        ),
                    ],
                ),
            ],
        );
        Self::with_catalog(catalog)
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            result_schema: Vec::new(),
            result_rows: Vec::new(),
            page_size: 2,
            list_delay: Duration::ZERO,
            query_delay: Duration::ZERO,
            job_delay: Duration::ZERO,
            dry_run_bytes: AtomicU64::new(1024),
            fail_listing: AtomicBool::new(false),
            fail_dry_run: AtomicBool::new(false),
            fail_after_pages: None,
            list_dataset_calls: AtomicUsize::new(0),
            list_table_calls: AtomicUsize::new(0),
            schema_calls: AtomicUsize::new(0),
            dry_run_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_rows(mut self, schema: Vec<Column>, rows: Vec<Value>) -> Self {
        self.result_schema = schema;
        self.result_rows = rows;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Serve `pages` pages, then fail the next page fetch.
    pub fn with_failing_page_after(mut self, pages: usize) -> Self {
        self.fail_after_pages = Some(pages);
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Block `query_results` this long, as a job that is still running.
    pub fn with_job_delay(mut self, delay: Duration) -> Self {
        self.job_delay = delay;
        self
    }

    pub fn with_dry_run_bytes(self, bytes: u64) -> Self {
        self.dry_run_bytes.store(bytes, Ordering::SeqCst);
        self
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_dry_run(&self, fail: bool) {
        self.fail_dry_run.store(fail, Ordering::SeqCst);
    }

    /// Add a dataset (with tables) to a project, creating the project.
    pub fn add_dataset(&self, dataset: Dataset, tables: Vec<Table>) {
        let mut catalog = self.catalog.lock().unwrap();
        catalog
            .entry(dataset.project_id.clone())
            .or_default()
            .push((dataset, tables));
    }

    /// Full metadata fetches observed (one `list_datasets` per project).
    pub fn fetches(&self) -> usize {
        self.list_dataset_calls.load(Ordering::SeqCst)
    }

    /// Every gateway call of any kind.
    pub fn total_calls(&self) -> usize {
        [
            &self.list_dataset_calls,
            &self.list_table_calls,
            &self.schema_calls,
            &self.dry_run_calls,
            &self.run_calls,
            &self.cancel_calls,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }

    fn listing_error(&self) -> Option<WorkerError> {
        self.fail_listing
            .load(Ordering::SeqCst)
            .then(|| WorkerError::remote("UNAVAILABLE", "warehouse unavailable"))
    }
}

#[async_trait]
impl WarehouseProvider for FakeWarehouse {
    async fn list_datasets(&self, project_id: &str) -> MetadataResult<Vec<Dataset>> {
        self.list_dataset_calls.fetch_add(1, Ordering::SeqCst);
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        if let Some(err) = self.listing_error() {
            return Err(err);
        }
        let catalog = self.catalog.lock().unwrap();
        Ok(catalog
            .get(project_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(d, _)| Dataset {
                        table_ids: Vec::new(),
                        ..d.clone()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_tables(&self, project_id: &str, dataset_id: &str) -> MetadataResult<Vec<String>> {
        self.list_table_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.listing_error() {
            return Err(err);
        }
        let catalog = self.catalog.lock().unwrap();
        Ok(find(&catalog, project_id, dataset_id)
            .map(|tables| tables.iter().map(|t| t.table_id().to_string()).collect())
            .unwrap_or_default())
    }

    async fn get_table_schema(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> MetadataResult<Table> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        let catalog = self.catalog.lock().unwrap();
        find(&catalog, project_id, dataset_id)
            .and_then(|tables| tables.iter().find(|t| t.table_id() == table_id))
            .cloned()
            .ok_or_else(|| WorkerError::NotFound(format!("{project_id}.{dataset_id}.{table_id}")))
    }

    async fn dry_run(&self, _sql: &str, _project_id: &str) -> MetadataResult<DryRunEstimate> {
        self.dry_run_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_dry_run.load(Ordering::SeqCst) {
            return Err(WorkerError::InvalidQuery("Unrecognized name: nope".into()));
        }
        let bytes = self.dry_run_bytes.load(Ordering::SeqCst);
        Ok(DryRunEstimate {
            total_bytes_processed: bytes,
            total_bytes_billed: bytes,
        })
    }

    async fn start_query(&self, _sql: &str, _project_id: &str) -> MetadataResult<String> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        Ok("job-1".to_string())
    }

    async fn query_results(&self, job_id: &str, _project_id: &str) -> MetadataResult<QueryJob> {
        if !self.job_delay.is_zero() {
            tokio::time::sleep(self.job_delay).await;
        }
        let pages: Vec<Vec<Value>> = self
            .result_rows
            .chunks(self.page_size)
            .map(<[Value]>::to_vec)
            .collect();

        // Rows arrive page by page after the job finishes.
        let delay = self.query_delay;
        let fail_after = self.fail_after_pages;
        let pages = stream::iter(pages.into_iter().enumerate())
            .then(move |(i, page)| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if fail_after.is_some_and(|n| i >= n) {
                    return Err(WorkerError::remote("BACKEND_ERROR", "page fetch failed"));
                }
                Ok(page)
            })
            .boxed();

        let bytes = self.dry_run_bytes.load(Ordering::SeqCst);
        Ok(QueryJob {
            job_id: job_id.to_string(),
            schema: self.result_schema.clone(),
            total_bytes_processed: Some(bytes),
            total_bytes_billed: Some(bytes),
            pages,
        })
    }

    async fn cancel_query(&self, _job_id: &str, _project_id: &str) -> MetadataResult<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn find<'a>(catalog: &'a Catalog, project_id: &str, dataset_id: &str) -> Option<&'a [Table]> {
    catalog.get(project_id).and_then(|entries| {
        entries
            .iter()
            .find(|(d, _)| d.dataset_id == dataset_id)
            .map(|(_, tables)| tables.as_slice())
    })
}

pub fn table(dataset_id: &str, table_id: &str, columns: Vec<Column>) -> Table {
    Table::new(TableRef::new(PROJECT, dataset_id, table_id), columns)
}

/// A row in warehouse wire form. `None` cells are null.
pub fn wire_row(cells: &[Option<&str>]) -> Value {
    let cells: Vec<Value> = cells.iter().map(|c| json!({ "v": c })).collect();
    json!({ "f": cells })
}
