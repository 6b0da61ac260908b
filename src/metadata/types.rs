//! Metadata entities.
//!
//! Passive data model for the warehouse hierarchy (project → dataset → table →
//! column) and the cache envelope that wraps a snapshot of it. Nothing here
//! performs I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::worker::WorkerError;

/// Current envelope format version. Bump this when the persisted layout changes.
pub const ENVELOPE_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Columns
// ============================================================================

/// Column mode as reported by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

impl ColumnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnMode::Nullable => "NULLABLE",
            ColumnMode::Required => "REQUIRED",
            ColumnMode::Repeated => "REPEATED",
        }
    }
}

impl fmt::Display for ColumnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column of a table, or a field of a query result.
///
/// RECORD columns carry their nested fields in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Declared type (e.g. `STRING`, `INT64`, `TIMESTAMP`, `RECORD`).
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub mode: ColumnMode,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Column>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            mode: ColumnMode::Nullable,
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: ColumnMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_fields(mut self, fields: Vec<Column>) -> Self {
        self.fields = fields;
        self
    }

    pub fn is_nullable(&self) -> bool {
        self.mode == ColumnMode::Nullable
    }

    pub fn is_repeated(&self) -> bool {
        self.mode == ColumnMode::Repeated
    }

    /// Whether this column holds nested fields.
    pub fn is_record(&self) -> bool {
        matches!(
            self.data_type.to_ascii_uppercase().as_str(),
            "RECORD" | "STRUCT"
        )
    }
}

// ============================================================================
// Tables and datasets
// ============================================================================

/// Fully qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// `project.dataset.table`
    pub fn qualified(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Table metadata including its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(flatten)]
    pub reference: TableRef,
    /// Ordered columns.
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub num_rows: Option<u64>,
    #[serde(default)]
    pub num_bytes: Option<u64>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Table {
    pub fn new(reference: TableRef, columns: Vec<Column>) -> Self {
        Self {
            reference,
            columns,
            description: None,
            num_rows: None,
            num_bytes: None,
            created: None,
            last_modified: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn table_id(&self) -> &str {
        &self.reference.table_id
    }

    pub fn full_table_id(&self) -> String {
        self.reference.qualified()
    }
}

/// Dataset metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub project_id: String,
    pub dataset_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Ids of the tables this dataset currently contains, in snapshot order.
    #[serde(default)]
    pub table_ids: Vec<String>,
}

impl Dataset {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            description: None,
            location: None,
            table_ids: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `project.dataset`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.project_id, self.dataset_id)
    }
}

// ============================================================================
// Snapshot and envelope
// ============================================================================

/// Immutable point-in-time view of all cached metadata.
///
/// Every table id listed by a dataset is present in `tables` under the same
/// project/dataset key. [`Snapshot::assemble`] guarantees this for fetched
/// data; [`Snapshot::validate`] re-checks snapshots read back from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// project id → datasets, in fetch order.
    datasets: BTreeMap<String, Vec<Dataset>>,
    /// project id → dataset id → tables, in fetch order.
    tables: BTreeMap<String, BTreeMap<String, Vec<Table>>>,
    created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot from fetched project partitions.
    ///
    /// Each dataset's `table_ids` is rewritten from the tables supplied for it,
    /// so the dataset/table invariant holds by construction.
    pub fn assemble(
        partitions: Vec<(String, Vec<(Dataset, Vec<Table>)>)>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut datasets = BTreeMap::new();
        let mut tables = BTreeMap::new();

        for (project_id, entries) in partitions {
            let mut project_datasets = Vec::with_capacity(entries.len());
            let mut project_tables = BTreeMap::new();

            for (mut dataset, dataset_tables) in entries {
                dataset.table_ids = dataset_tables
                    .iter()
                    .map(|t| t.reference.table_id.clone())
                    .collect();
                project_tables.insert(dataset.dataset_id.clone(), dataset_tables);
                project_datasets.push(dataset);
            }

            datasets.insert(project_id.clone(), project_datasets);
            tables.insert(project_id, project_tables);
        }

        Self {
            datasets,
            tables,
            created_at,
        }
    }

    /// An empty snapshot (no projects configured).
    pub fn empty(created_at: DateTime<Utc>) -> Self {
        Self::assemble(Vec::new(), created_at)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Project ids present in the snapshot.
    pub fn project_ids(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    /// Datasets of one project (empty if the project is unknown).
    pub fn datasets(&self, project_id: &str) -> &[Dataset] {
        self.datasets
            .get(project_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All datasets across all projects.
    pub fn all_datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values().flatten()
    }

    /// Find a dataset by project and id.
    pub fn dataset(&self, project_id: &str, dataset_id: &str) -> Option<&Dataset> {
        self.datasets(project_id)
            .iter()
            .find(|d| d.dataset_id == dataset_id)
    }

    /// Tables of one dataset (empty if unknown).
    pub fn tables(&self, project_id: &str, dataset_id: &str) -> &[Table] {
        self.tables
            .get(project_id)
            .and_then(|p| p.get(dataset_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All tables in dataset order.
    pub fn all_tables(&self) -> impl Iterator<Item = &Table> {
        self.all_datasets()
            .flat_map(|d| self.tables(&d.project_id, &d.dataset_id).iter())
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.values().map(Vec::len).sum()
    }

    pub fn table_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Check the dataset/table invariant.
    pub fn validate(&self) -> Result<(), String> {
        for (project_id, datasets) in &self.datasets {
            for dataset in datasets {
                if &dataset.project_id != project_id {
                    return Err(format!(
                        "dataset {} filed under project {}",
                        dataset.qualified(),
                        project_id
                    ));
                }
                let tables = self.tables(project_id, &dataset.dataset_id);
                for table_id in &dataset.table_ids {
                    if !tables.iter().any(|t| &t.reference.table_id == table_id) {
                        return Err(format!(
                            "table {}.{} listed but missing",
                            dataset.qualified(),
                            table_id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Persisted cache envelope: snapshot plus freshness bookkeeping.
///
/// Replaced wholesale by every refresh, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub format_version: u32,
    pub snapshot: Arc<Snapshot>,
    pub ttl_seconds: u64,
    pub last_refreshed: DateTime<Utc>,
}

impl CacheEnvelope {
    pub fn new(snapshot: Snapshot, ttl_seconds: u64) -> Self {
        let last_refreshed = snapshot.created_at();
        Self {
            format_version: ENVELOPE_FORMAT_VERSION,
            snapshot: Arc::new(snapshot),
            ttl_seconds,
            last_refreshed,
        }
    }

    /// Age relative to `now`; negative ages (clock skew) count as zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_refreshed).max(Duration::zero())
    }

    /// Stale once the age reaches the TTL.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let ttl = Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX));
        self.age(now) >= ttl
    }
}

// ============================================================================
// Query-side entities
// ============================================================================

/// Cost estimate returned by a warehouse dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DryRunEstimate {
    pub total_bytes_processed: u64,
    pub total_bytes_billed: u64,
}

/// One page of raw result rows in warehouse wire form.
pub type RowPage = Vec<serde_json::Value>;

/// Lazily fetched pages of a running query.
pub type RowPages = BoxStream<'static, Result<RowPage, WorkerError>>;

/// A started query job.
pub struct QueryJob {
    pub job_id: String,
    /// Result schema, in projection order.
    pub schema: Vec<Column>,
    pub total_bytes_processed: Option<u64>,
    pub total_bytes_billed: Option<u64>,
    /// Remaining result pages (the first page included).
    pub pages: RowPages,
}

impl fmt::Debug for QueryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryJob")
            .field("job_id", &self.job_id)
            .field("schema", &self.schema)
            .field("total_bytes_processed", &self.total_bytes_processed)
            .field("total_bytes_billed", &self.total_bytes_billed)
            .finish_non_exhaustive()
    }
}
