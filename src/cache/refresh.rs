//! Full metadata fetch.

use chrono::Utc;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, instrument};

use crate::config::{dataset_allowed, DatasetFilter};
use crate::metadata::{Dataset, MetadataResult, Snapshot, Table, WarehouseProvider};
use crate::worker::WorkerError;

/// Fetch every configured project and assemble a snapshot.
///
/// Projects are fetched concurrently. Within a project, datasets and table
/// schemas are fetched with at most `concurrency` calls in flight, keeping
/// listing order. Filtered-out datasets are never fetched. Any gateway
/// failure fails the whole fetch.
#[instrument(skip_all, fields(projects = project_ids.len()))]
pub async fn fetch_snapshot(
    provider: &dyn WarehouseProvider,
    project_ids: &[String],
    filters: &[DatasetFilter],
    concurrency: usize,
) -> MetadataResult<Snapshot> {
    let partitions = future::try_join_all(
        project_ids
            .iter()
            .map(|project_id| fetch_project(provider, project_id, filters, concurrency)),
    )
    .await?;

    Ok(Snapshot::assemble(partitions, Utc::now()))
}

async fn fetch_project(
    provider: &dyn WarehouseProvider,
    project_id: &str,
    filters: &[DatasetFilter],
    concurrency: usize,
) -> MetadataResult<(String, Vec<(Dataset, Vec<Table>)>)> {
    let listed = provider.list_datasets(project_id).await?;
    let total = listed.len();
    let datasets: Vec<Dataset> = listed
        .into_iter()
        .filter(|d| dataset_allowed(filters, project_id, &d.dataset_id))
        .collect();
    debug!(project_id, total, kept = datasets.len(), "datasets listed");

    let entries: Vec<(Dataset, Vec<Table>)> = stream::iter(datasets)
        .map(|dataset| async move {
            let table_ids = provider.list_tables(project_id, &dataset.dataset_id).await?;
            let tables = provider
                .get_table_schemas(project_id, &dataset.dataset_id, &table_ids, concurrency)
                .await?;
            Ok::<_, WorkerError>((dataset, tables))
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok((project_id.to_string(), entries))
}
