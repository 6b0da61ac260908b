//! Wire types for the warehouse worker.
//!
//! One JSON object per line in each direction. Requests carry a correlation
//! id; the worker answers with a response envelope holding either `result` or
//! `error`.

use serde::{Deserialize, Serialize};

use crate::metadata::Column;

// ============================================================================
// Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub id: String,
    /// Method name, one of [`methods`].
    pub method: String,
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Method names understood by the worker.
pub mod methods {
    pub const LIST_DATASETS: &str = "metadata.list_datasets";
    pub const LIST_TABLES: &str = "metadata.list_tables";
    pub const GET_TABLE: &str = "metadata.get_table";
    pub const DRY_RUN: &str = "query.dry_run";
    pub const START: &str = "query.start";
    pub const RESULTS: &str = "query.results";
    pub const FETCH_PAGE: &str = "query.fetch_page";
    pub const CANCEL: &str = "query.cancel";
}

// ============================================================================
// Metadata listing
// ============================================================================

/// Page size used for every listing call.
pub const LIST_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct ListDatasetsParams {
    pub project_id: String,
    pub max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDatasetsResponse {
    #[serde(default)]
    pub datasets: Vec<DatasetInfo>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    pub dataset_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListTablesParams {
    pub project_id: String,
    pub dataset_id: String,
    pub max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListTablesResponse {
    #[serde(default)]
    pub tables: Vec<TableListEntry>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableListEntry {
    pub table_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetTableParams {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

/// Full table resource. Timestamps are epoch milliseconds, counters are
/// decimal strings, as the warehouse REST API reports them.
#[derive(Debug, Clone, Deserialize)]
pub struct GetTableResponse {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Vec<Column>,
    #[serde(default)]
    pub num_rows: Option<String>,
    #[serde(default)]
    pub num_bytes: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub last_modified_time: Option<String>,
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DryRunParams {
    pub sql: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunResponse {
    #[serde(default)]
    pub total_bytes_processed: Option<String>,
    #[serde(default)]
    pub total_bytes_billed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartQueryParams {
    pub sql: String,
    pub project_id: String,
}

/// Answered as soon as the job is submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct StartQueryResponse {
    pub job_id: String,
}

/// Addresses one job (`query.results`, `query.cancel`).
#[derive(Debug, Clone, Serialize)]
pub struct JobParams {
    pub job_id: String,
    pub project_id: String,
}

/// First page of a finished job.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultsResponse {
    #[serde(default)]
    pub schema: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub total_bytes_processed: Option<String>,
    #[serde(default)]
    pub total_bytes_billed: Option<String>,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchPageParams {
    pub job_id: String,
    pub project_id: String,
    pub page_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchPageResponse {
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub page_token: Option<String>,
}

/// Parse a decimal counter string (`"1024"`) as reported by the warehouse.
pub fn parse_counter(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}
