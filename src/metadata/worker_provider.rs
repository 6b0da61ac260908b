//! WorkerWarehouseProvider implementation.
//!
//! Forwards every gateway call to the worker process. Listings are paged
//! through until the worker stops returning a `next_page_token`; query
//! results are exposed as a lazily fetched page stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, instrument};

use super::provider::{MetadataResult, WarehouseProvider};
use super::types::{Dataset, DryRunEstimate, QueryJob, RowPage, Table, TableRef};
use crate::worker::protocol::{self, methods, parse_counter, LIST_PAGE_SIZE};
use crate::worker::WorkerClient;

/// Gateway backed by the worker process.
pub struct WorkerWarehouseProvider {
    client: Arc<WorkerClient>,
    /// Deadline for `query.results`; metadata calls use the client default.
    query_timeout: Duration,
}

impl WorkerWarehouseProvider {
    pub fn new(client: Arc<WorkerClient>, query_timeout: Duration) -> Self {
        Self {
            client,
            query_timeout,
        }
    }
}

#[async_trait]
impl WarehouseProvider for WorkerWarehouseProvider {
    #[instrument(skip(self))]
    async fn list_datasets(&self, project_id: &str) -> MetadataResult<Vec<Dataset>> {
        let mut datasets = Vec::new();
        let mut page_token = None;

        loop {
            let response: protocol::ListDatasetsResponse = self
                .client
                .request(
                    methods::LIST_DATASETS,
                    protocol::ListDatasetsParams {
                        project_id: project_id.to_string(),
                        max_results: LIST_PAGE_SIZE,
                        page_token: page_token.take(),
                    },
                )
                .await?;

            datasets.extend(response.datasets.into_iter().map(|info| Dataset {
                project_id: project_id.to_string(),
                dataset_id: info.dataset_id,
                description: info.description,
                location: info.location,
                table_ids: Vec::new(),
            }));

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = datasets.len(), "listed datasets");
        Ok(datasets)
    }

    #[instrument(skip(self))]
    async fn list_tables(&self, project_id: &str, dataset_id: &str) -> MetadataResult<Vec<String>> {
        let mut table_ids = Vec::new();
        let mut page_token = None;

        loop {
            let response: protocol::ListTablesResponse = self
                .client
                .request(
                    methods::LIST_TABLES,
                    protocol::ListTablesParams {
                        project_id: project_id.to_string(),
                        dataset_id: dataset_id.to_string(),
                        max_results: LIST_PAGE_SIZE,
                        page_token: page_token.take(),
                    },
                )
                .await?;

            table_ids.extend(response.tables.into_iter().map(|t| t.table_id));

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(table_ids)
    }

    async fn get_table_schema(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> MetadataResult<Table> {
        let response: protocol::GetTableResponse = self
            .client
            .request(
                methods::GET_TABLE,
                protocol::GetTableParams {
                    project_id: project_id.to_string(),
                    dataset_id: dataset_id.to_string(),
                    table_id: table_id.to_string(),
                },
            )
            .await?;

        Ok(Table {
            reference: TableRef::new(project_id, dataset_id, table_id),
            columns: response.schema,
            description: response.description,
            num_rows: parse_counter(response.num_rows.as_deref()),
            num_bytes: parse_counter(response.num_bytes.as_deref()),
            created: epoch_millis(response.creation_time.as_deref()),
            last_modified: epoch_millis(response.last_modified_time.as_deref()),
        })
    }

    #[instrument(skip(self, sql))]
    async fn dry_run(&self, sql: &str, project_id: &str) -> MetadataResult<DryRunEstimate> {
        let response: protocol::DryRunResponse = self
            .client
            .request(
                methods::DRY_RUN,
                protocol::DryRunParams {
                    sql: sql.to_string(),
                    project_id: project_id.to_string(),
                },
            )
            .await?;

        Ok(DryRunEstimate {
            total_bytes_processed: parse_counter(response.total_bytes_processed.as_deref())
                .unwrap_or(0),
            total_bytes_billed: parse_counter(response.total_bytes_billed.as_deref()).unwrap_or(0),
        })
    }

    #[instrument(skip(self, sql))]
    async fn start_query(&self, sql: &str, project_id: &str) -> MetadataResult<String> {
        let response: protocol::StartQueryResponse = self
            .client
            .request(
                methods::START,
                protocol::StartQueryParams {
                    sql: sql.to_string(),
                    project_id: project_id.to_string(),
                },
            )
            .await?;

        debug!(job_id = %response.job_id, "query submitted");
        Ok(response.job_id)
    }

    #[instrument(skip(self))]
    async fn query_results(&self, job_id: &str, project_id: &str) -> MetadataResult<QueryJob> {
        let response: protocol::QueryResultsResponse = self
            .client
            .request_with_timeout(
                methods::RESULTS,
                protocol::JobParams {
                    job_id: job_id.to_string(),
                    project_id: project_id.to_string(),
                },
                self.query_timeout,
            )
            .await?;

        debug!(rows = response.rows.len(), "query finished");

        let cursor = PageCursor {
            client: self.client.clone(),
            job_id: job_id.to_string(),
            project_id: project_id.to_string(),
            first: Some(response.rows),
            page_token: response.page_token,
        };

        Ok(QueryJob {
            job_id: job_id.to_string(),
            schema: response.schema,
            total_bytes_processed: parse_counter(response.total_bytes_processed.as_deref()),
            total_bytes_billed: parse_counter(response.total_bytes_billed.as_deref()),
            pages: stream::try_unfold(cursor, next_page).boxed(),
        })
    }

    async fn cancel_query(&self, job_id: &str, project_id: &str) -> MetadataResult<()> {
        let _: serde_json::Value = self
            .client
            .request(
                methods::CANCEL,
                protocol::JobParams {
                    job_id: job_id.to_string(),
                    project_id: project_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}

/// Position within a job's result pages.
struct PageCursor {
    client: Arc<WorkerClient>,
    job_id: String,
    project_id: String,
    /// Rows delivered with `query.results`, not yet yielded.
    first: Option<RowPage>,
    page_token: Option<String>,
}

async fn next_page(mut cursor: PageCursor) -> MetadataResult<Option<(RowPage, PageCursor)>> {
    if let Some(rows) = cursor.first.take() {
        return Ok(Some((rows, cursor)));
    }

    let page_token = match cursor.page_token.take() {
        Some(token) if !token.is_empty() => token,
        _ => return Ok(None),
    };

    let response: protocol::FetchPageResponse = cursor
        .client
        .request(
            methods::FETCH_PAGE,
            protocol::FetchPageParams {
                job_id: cursor.job_id.clone(),
                project_id: cursor.project_id.clone(),
                page_token,
            },
        )
        .await?;

    cursor.page_token = response.page_token;
    Ok(Some((response.rows, cursor)))
}

fn epoch_millis(value: Option<&str>) -> Option<DateTime<Utc>> {
    let millis: i64 = value?.trim().parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}
