//! WarehouseProvider trait definition.
//!
//! The seam between this crate and the warehouse. The production
//! implementation forwards to the worker process; tests substitute an
//! in-memory warehouse.

use async_trait::async_trait;

use super::types::{Dataset, DryRunEstimate, QueryJob, Table};
use crate::worker::WorkerError;

/// Result type for warehouse operations.
pub type MetadataResult<T> = Result<T, WorkerError>;

/// Remote metadata gateway.
///
/// Listing calls return complete results; pagination is the implementor's
/// concern.
#[async_trait]
pub trait WarehouseProvider: Send + Sync {
    // =========================================================================
    // Metadata
    // =========================================================================

    /// All datasets of a project. `table_ids` is left empty.
    async fn list_datasets(&self, project_id: &str) -> MetadataResult<Vec<Dataset>>;

    /// Ids of the tables in a dataset.
    async fn list_tables(&self, project_id: &str, dataset_id: &str) -> MetadataResult<Vec<String>>;

    /// Full table metadata including the column schema.
    async fn get_table_schema(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> MetadataResult<Table>;

    // =========================================================================
    // Queries
    // =========================================================================

    /// Estimate bytes scanned without running anything.
    async fn dry_run(&self, sql: &str, project_id: &str) -> MetadataResult<DryRunEstimate>;

    /// Submit a query job and return its id without waiting for it.
    async fn start_query(&self, sql: &str, project_id: &str) -> MetadataResult<String>;

    /// Wait for a started job and return its schema and a lazy page stream.
    async fn query_results(&self, job_id: &str, project_id: &str) -> MetadataResult<QueryJob>;

    /// Ask the warehouse to stop a running job. Best-effort.
    async fn cancel_query(&self, _job_id: &str, _project_id: &str) -> MetadataResult<()> {
        Ok(())
    }

    // =========================================================================
    // Batch operations (default implementations)
    // =========================================================================

    /// Fetch several table schemas of one dataset, preserving input order.
    ///
    /// At most `concurrency` requests are in flight at once.
    async fn get_table_schemas(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_ids: &[String],
        concurrency: usize,
    ) -> MetadataResult<Vec<Table>> {
        use futures::stream::{self, StreamExt, TryStreamExt};

        // Built up front: a borrowing closure inside the stream trips the
        // `Send` bound async-trait puts on this future.
        let requests: Vec<_> = table_ids
            .iter()
            .map(|table_id| self.get_table_schema(project_id, dataset_id, table_id))
            .collect();

        stream::iter(requests)
            .buffered(concurrency.max(1))
            .try_collect()
            .await
    }
}
