//! Query execution: dry-run budget checks, bounded inline execution and
//! streaming exports.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{info, instrument, warn};

use super::convert::{convert_row, Record};
use super::export::{validate_output_path, write_export, ExportFormat};
use crate::config::{Settings, SettingsError};
use crate::error::{ServiceError, ServiceResult};
use crate::metadata::{Column, MetadataResult, QueryJob, WarehouseProvider};
use crate::sql::{analyze, plan_with_limit};

/// Upper bound on the best-effort cancel sent after a timeout.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Executor limits, resolved from settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_scan_bytes: u64,
    pub default_limit: u64,
    pub timeout: Duration,
    pub export_root: PathBuf,
    /// Project used when a call names none.
    pub default_project: Option<String>,
}

impl ExecutorConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self {
            max_scan_bytes: settings.query.max_scan_bytes,
            default_limit: settings.query.default_limit,
            timeout: Duration::from_secs(settings.query.timeout_seconds),
            export_root: settings.export_root()?,
            default_project: settings.query_project_id(None),
        })
    }
}

/// Outcome of a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunResult {
    pub sql: String,
    pub project_id: String,
    pub total_bytes_processed: u64,
    pub total_bytes_billed: u64,
    /// False when the warehouse refused or failed the dry run.
    pub valid: bool,
    pub within_limit: bool,
    pub max_scan_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Why an execution did not produce rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFailure {
    #[error("{reason}")]
    Rejected { reason: String },

    #[error(
        "Query scan amount exceeds limit. Expected scan amount: {estimated} bytes, Limit: {limit} bytes"
    )]
    ScanLimitExceeded { estimated: u64, limit: u64 },

    #[error("Query timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("{message}")]
    Remote { message: String },
}

/// Result of an inline execution. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// SQL actually sent (after LIMIT rewriting).
    pub sql: String,
    pub project_id: Option<String>,
    pub job_id: Option<String>,
    pub schema: Vec<Column>,
    pub rows: Vec<Record>,
    pub row_count: usize,
    pub total_bytes_processed: Option<u64>,
    pub total_bytes_billed: Option<u64>,
    pub elapsed_ms: u64,
    pub original_limit: Option<u64>,
    pub applied_limit: Option<u64>,
    pub limit_was_modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionResult {
    fn fail(mut self, failure: ExecutionFailure, started: Instant) -> Self {
        self.success = false;
        self.error_message = Some(failure.to_string());
        self.failure = Some(failure);
        self.elapsed_ms = elapsed_ms(started);
        self
    }
}

/// What a successful export produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportDescriptor {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub include_header: bool,
    pub rows_written: u64,
    pub bytes_written: u64,
    pub total_bytes_processed: Option<u64>,
    pub job_id: Option<String>,
    pub elapsed_ms: u64,
    pub project_id: String,
}

/// Runs classified SQL against the warehouse.
pub struct QueryExecutor {
    provider: Arc<dyn WarehouseProvider>,
    config: ExecutorConfig,
}

impl QueryExecutor {
    pub fn new(provider: Arc<dyn WarehouseProvider>, config: ExecutorConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn project(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.config.default_project.clone())
    }

    /// Estimate the bytes `sql` would scan.
    ///
    /// Unsafe SQL is an error. A failed dry run is reported in the result
    /// with `valid: false`.
    #[instrument(skip_all)]
    pub async fn check_scan_amount(
        &self,
        sql: &str,
        project_id: Option<&str>,
    ) -> ServiceResult<DryRunResult> {
        let plan = analyze(sql);
        if let Some(reason) = plan.rejection_reason() {
            return Err(ServiceError::QueryRejected {
                reason: reason.to_string(),
            });
        }
        let project = self
            .project(project_id)
            .ok_or_else(|| ServiceError::RemoteGateway("no query project configured".into()))?;

        let mut result = DryRunResult {
            sql: plan.sql.clone(),
            project_id: project.clone(),
            total_bytes_processed: 0,
            total_bytes_billed: 0,
            valid: false,
            within_limit: false,
            max_scan_bytes: self.config.max_scan_bytes,
            error_message: None,
        };

        match timeout(self.config.timeout, self.provider.dry_run(&plan.sql, &project)).await {
            Ok(Ok(estimate)) => {
                result.total_bytes_processed = estimate.total_bytes_processed;
                result.total_bytes_billed = estimate.total_bytes_billed;
                result.valid = true;
                result.within_limit = estimate.total_bytes_processed <= self.config.max_scan_bytes;
                info!(
                    project = %project,
                    bytes = estimate.total_bytes_processed,
                    within_limit = result.within_limit,
                    "dry run"
                );
            }
            Ok(Err(e)) => {
                warn!(project = %project, error = %e, "dry run failed");
                result.error_message = Some(e.to_string());
            }
            Err(_) => {
                let seconds = timeout_seconds(self.config.timeout);
                warn!(project = %project, seconds, "dry run timed out");
                result.error_message = Some(format!("dry run timed out after {seconds} seconds"));
            }
        }

        Ok(result)
    }

    /// Classify, bound with a LIMIT, budget-check and run `sql`.
    ///
    /// The configured timeout covers the dry run and the execution
    /// together. With `force` the scan budget is ignored.
    #[instrument(skip_all, fields(force = force))]
    pub async fn execute_query(
        &self,
        sql: &str,
        project_id: Option<&str>,
        force: bool,
    ) -> ExecutionResult {
        let started = Instant::now();
        let plan = plan_with_limit(sql, self.config.default_limit);
        let project = self.project(project_id);

        let result = ExecutionResult {
            success: false,
            sql: plan.sql.clone(),
            project_id: project.clone(),
            job_id: None,
            schema: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            total_bytes_processed: None,
            total_bytes_billed: None,
            elapsed_ms: 0,
            original_limit: plan.original_limit,
            applied_limit: plan.applied_limit,
            limit_was_modified: plan.limit_was_modified,
            failure: None,
            error_message: None,
        };

        if let Some(reason) = plan.rejection_reason() {
            info!(reason, "query rejected");
            let reason = reason.to_string();
            return result.fail(ExecutionFailure::Rejected { reason }, started);
        }
        let Some(project) = project else {
            let message = "no query project configured".to_string();
            return result.fail(ExecutionFailure::Remote { message }, started);
        };

        let deadline = started + self.config.timeout;
        let timed_out = ExecutionFailure::Timeout {
            seconds: timeout_seconds(self.config.timeout),
        };

        let estimate = match timeout_at(deadline, self.provider.dry_run(&plan.sql, &project)).await
        {
            Ok(Ok(estimate)) => estimate,
            Ok(Err(e)) => {
                let message = e.to_string();
                return result.fail(ExecutionFailure::Remote { message }, started);
            }
            Err(_) => return result.fail(timed_out, started),
        };

        let mut result = result;
        result.total_bytes_processed = Some(estimate.total_bytes_processed);
        result.total_bytes_billed = Some(estimate.total_bytes_billed);

        if estimate.total_bytes_processed > self.config.max_scan_bytes {
            if !force {
                let failure = ExecutionFailure::ScanLimitExceeded {
                    estimated: estimate.total_bytes_processed,
                    limit: self.config.max_scan_bytes,
                };
                return result.fail(failure, started);
            }
            warn!(
                estimated = estimate.total_bytes_processed,
                limit = self.config.max_scan_bytes,
                "scan budget exceeded; running anyway (forced)"
            );
        }

        let cap = plan
            .applied_limit
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(usize::MAX);
        let mut job_id = None;
        let outcome = timeout_at(deadline, async {
            let id = self.provider.start_query(&plan.sql, &project).await?;
            job_id = Some(id.clone());
            let job = self.provider.query_results(&id, &project).await?;
            collect_rows(job, cap).await
        })
        .await;

        result.job_id = job_id.clone();
        match outcome {
            Ok(Ok(collected)) => {
                result.success = true;
                result.row_count = collected.rows.len();
                result.rows = collected.rows;
                result.schema = collected.schema;
                if collected.total_bytes_processed.is_some() {
                    result.total_bytes_processed = collected.total_bytes_processed;
                }
                if collected.total_bytes_billed.is_some() {
                    result.total_bytes_billed = collected.total_bytes_billed;
                }
                result.elapsed_ms = elapsed_ms(started);
                info!(
                    project = %project,
                    rows = result.row_count,
                    elapsed_ms = result.elapsed_ms,
                    "query executed"
                );
                result
            }
            Ok(Err(e)) => {
                warn!(project = %project, error = %e, "query failed");
                let message = e.to_string();
                result.fail(ExecutionFailure::Remote { message }, started)
            }
            Err(_) => {
                warn!(project = %project, "query timed out");
                if let Some(job_id) = job_id {
                    self.cancel(&job_id, &project).await;
                }
                result.fail(timed_out, started)
            }
        }
    }

    /// Run `sql` unbounded and stream every row into `output_path`.
    ///
    /// The path is validated before anything is sent to the warehouse.
    #[instrument(skip_all, fields(format = %format))]
    pub async fn save_query_result(
        &self,
        sql: &str,
        output_path: &str,
        format: ExportFormat,
        project_id: Option<&str>,
        include_header: bool,
    ) -> ServiceResult<ExportDescriptor> {
        let started = Instant::now();
        let path = validate_output_path(&self.config.export_root, output_path)?;

        let plan = analyze(sql);
        if let Some(reason) = plan.rejection_reason() {
            return Err(ServiceError::QueryRejected {
                reason: reason.to_string(),
            });
        }
        let project = self
            .project(project_id)
            .ok_or_else(|| ServiceError::RemoteGateway("no query project configured".into()))?;

        let deadline = started + self.config.timeout;
        let seconds = timeout_seconds(self.config.timeout);

        let estimate = timeout_at(deadline, self.provider.dry_run(&plan.sql, &project))
            .await
            .map_err(|_| ServiceError::ExecutionTimeout { seconds })??;
        if estimate.total_bytes_processed > self.config.max_scan_bytes {
            return Err(ServiceError::ScanLimitExceeded {
                estimated: estimate.total_bytes_processed,
                limit: self.config.max_scan_bytes,
            });
        }

        let mut started_job = None;
        let outcome = timeout_at(deadline, async {
            let id = self.provider.start_query(&plan.sql, &project).await?;
            started_job = Some(id.clone());
            self.provider.query_results(&id, &project).await
        })
        .await;
        let job = match outcome {
            Ok(job) => job?,
            Err(_) => {
                warn!(project = %project, "export query timed out");
                if let Some(job_id) = started_job {
                    self.cancel(&job_id, &project).await;
                }
                return Err(ServiceError::ExecutionTimeout { seconds });
            }
        };
        let QueryJob {
            job_id,
            schema,
            total_bytes_processed,
            pages,
            ..
        } = job;

        let summary = write_export(&path, format, include_header, &schema, pages).await?;
        let elapsed_ms = elapsed_ms(started);
        info!(
            path = %path.display(),
            rows = summary.rows_written,
            bytes = summary.bytes_written,
            elapsed_ms,
            "query result saved"
        );

        Ok(ExportDescriptor {
            path,
            format,
            include_header,
            rows_written: summary.rows_written,
            bytes_written: summary.bytes_written,
            total_bytes_processed: total_bytes_processed.or(Some(estimate.total_bytes_processed)),
            job_id: Some(job_id),
            elapsed_ms,
            project_id: project,
        })
    }

    async fn cancel(&self, job_id: &str, project: &str) {
        match timeout(CANCEL_GRACE, self.provider.cancel_query(job_id, project)).await {
            Ok(Ok(())) => info!(job_id, "cancelled timed out job"),
            Ok(Err(e)) => warn!(job_id, error = %e, "failed to cancel job"),
            Err(_) => warn!(job_id, "cancel request timed out"),
        }
    }
}

struct Collected {
    schema: Vec<Column>,
    rows: Vec<Record>,
    total_bytes_processed: Option<u64>,
    total_bytes_billed: Option<u64>,
}

/// Read pages until `cap` rows are converted or the job is exhausted.
async fn collect_rows(job: QueryJob, cap: usize) -> MetadataResult<Collected> {
    let QueryJob {
        schema,
        total_bytes_processed,
        total_bytes_billed,
        mut pages,
        ..
    } = job;

    let mut rows = Vec::new();
    while rows.len() < cap {
        let Some(page) = pages.try_next().await? else {
            break;
        };
        let room = cap - rows.len();
        rows.extend(page.iter().take(room).map(|raw| convert_row(&schema, raw)));
    }

    Ok(Collected {
        schema,
        rows,
        total_bytes_processed,
        total_bytes_billed,
    })
}

/// Whole seconds, rounded up so a sub-second timeout never reads as zero.
fn timeout_seconds(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis().div_ceil(1000)).unwrap_or(u64::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
