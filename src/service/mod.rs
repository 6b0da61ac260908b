//! Orchestration facade.
//!
//! `MetadataService` is the one entry point adapters call. It reads
//! snapshots through a [`SnapshotSource`], builds search indexes on demand
//! and delegates SQL work to the [`QueryExecutor`]. Every operation returns
//! either its payload or a [`ServiceError`].

pub mod markdown;

use std::sync::Arc;

use tracing::{info, Instrument};

use crate::cache::{CacheManager, SnapshotSource};
use crate::config::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::metadata::{Dataset, Table, WarehouseProvider};
use crate::observability::operation_span;
use crate::query::{
    DryRunResult, ExecutionResult, ExecutorConfig, ExportDescriptor, ExportFormat, QueryExecutor,
};
use crate::search::{SearchHit, SearchIndex};

/// Summary returned by an explicit cache refresh.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RefreshSummary {
    pub projects: usize,
    pub datasets: usize,
    pub tables: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct MetadataService {
    snapshots: Arc<dyn SnapshotSource>,
    executor: QueryExecutor,
    project_ids: Vec<String>,
}

impl MetadataService {
    pub fn new(
        snapshots: Arc<dyn SnapshotSource>,
        executor: QueryExecutor,
        project_ids: Vec<String>,
    ) -> Self {
        Self {
            snapshots,
            executor,
            project_ids,
        }
    }

    /// Wire a cache manager and executor over one provider.
    pub fn from_settings(
        provider: Arc<dyn WarehouseProvider>,
        settings: &Settings,
    ) -> ServiceResult<Self> {
        let cache = CacheManager::from_settings(provider.clone(), settings)?;
        let config = ExecutorConfig::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(cache),
            QueryExecutor::new(provider, config),
            settings.project_ids(),
        ))
    }

    /// Every cached dataset: projects by id, datasets in the order the
    /// warehouse listed them.
    pub async fn get_datasets(&self) -> ServiceResult<Vec<Dataset>> {
        async {
            let snapshot = self.snapshots.current_snapshot().await?;
            Ok::<_, ServiceError>(snapshot.all_datasets().cloned().collect::<Vec<_>>())
        }
        .instrument(operation_span("get_datasets"))
        .await
    }

    /// Datasets of one project. Empty for an unknown project.
    pub async fn get_datasets_by_project(&self, project_id: &str) -> ServiceResult<Vec<Dataset>> {
        async {
            let snapshot = self.snapshots.current_snapshot().await?;
            Ok::<_, ServiceError>(snapshot.datasets(project_id).to_vec())
        }
        .instrument(operation_span("get_datasets_by_project"))
        .await
    }

    /// Tables of a dataset.
    ///
    /// Without `project_id` every configured project is searched in order
    /// and the first one holding the dataset wins.
    pub async fn get_tables(
        &self,
        dataset_id: &str,
        project_id: Option<&str>,
    ) -> ServiceResult<Vec<Table>> {
        async {
            let snapshot = self.snapshots.current_snapshot().await?;
            let candidates: Vec<&str> = match project_id {
                Some(project) => vec![project],
                None => self.project_ids.iter().map(String::as_str).collect(),
            };

            candidates
                .into_iter()
                .find(|project| snapshot.dataset(project, dataset_id).is_some())
                .map(|project| snapshot.tables(project, dataset_id).to_vec())
                .ok_or_else(|| {
                    let scope = project_id.map_or_else(
                        || dataset_id.to_string(),
                        |project| format!("{project}.{dataset_id}"),
                    );
                    ServiceError::NotFound(format!("dataset {scope}"))
                })
        }
        .instrument(operation_span("get_tables"))
        .await
    }

    /// Datasets, tables and columns whose name or description contains any
    /// term of `keyword`.
    pub async fn search_metadata(&self, keyword: &str) -> ServiceResult<Vec<SearchHit>> {
        async {
            let snapshot = self.snapshots.current_snapshot().await?;
            let hits = SearchIndex::build(&snapshot).search_terms(keyword);
            info!(keyword, hits = hits.len(), "metadata search");
            Ok::<_, ServiceError>(hits)
        }
        .instrument(operation_span("search_metadata"))
        .await
    }

    pub async fn check_query_scan_amount(
        &self,
        sql: &str,
        project_id: Option<&str>,
    ) -> ServiceResult<DryRunResult> {
        self.executor
            .check_scan_amount(sql, project_id)
            .instrument(operation_span("check_query_scan_amount"))
            .await
    }

    /// Failures are reported inside the result.
    pub async fn execute_query(
        &self,
        sql: &str,
        project_id: Option<&str>,
        force: bool,
    ) -> ExecutionResult {
        self.executor
            .execute_query(sql, project_id, force)
            .instrument(operation_span("execute_query"))
            .await
    }

    /// `format` is `csv` or `jsonl`, case-insensitive.
    pub async fn save_query_result(
        &self,
        sql: &str,
        output_path: &str,
        format: &str,
        project_id: Option<&str>,
        include_header: bool,
    ) -> ServiceResult<ExportDescriptor> {
        async {
            let format = format.parse::<ExportFormat>()?;
            self.executor
                .save_query_result(sql, output_path, format, project_id, include_header)
                .await
        }
        .instrument(operation_span("save_query_result"))
        .await
    }

    /// Refetch all metadata now, regardless of TTL.
    pub async fn refresh_cache(&self) -> ServiceResult<RefreshSummary> {
        async {
            let snapshot = self.snapshots.force_refresh().await?;
            Ok::<_, ServiceError>(RefreshSummary {
                projects: snapshot.project_ids().count(),
                datasets: snapshot.dataset_count(),
                tables: snapshot.table_count(),
                created_at: snapshot.created_at(),
            })
        }
        .instrument(operation_span("refresh_cache"))
        .await
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }
}
