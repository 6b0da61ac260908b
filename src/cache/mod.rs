//! Metadata cache with TTL and stale-while-revalidate.
//!
//! # Design
//!
//! - One immutable [`CacheEnvelope`] is published through a `watch` channel;
//!   readers clone the `Arc` and never hold a lock across an await.
//! - No snapshot at all: the reader performs a synchronous full refresh.
//! - Stale snapshot: the reader gets it immediately and a refresh request is
//!   queued for the coordinator task, which drops requests that arrive once
//!   the snapshot is fresh again.
//! - Every refresh (background or forced) goes through a [`SingleFlight`]
//!   keyed `"refresh"`, so at most one fetch is in flight.
//! - The envelope is persisted to one file per deployment ([`EnvelopeStore`]).
//!
//! ```text
//! reader ──▶ get_current_snapshot ──▶ watch::borrow ──▶ Arc<Snapshot>
//!                  │ stale
//!                  ▼
//!            refresh_tx (cap 1) ──▶ coordinator ──▶ SingleFlight("refresh")
//!                                                        │
//!                                   force_refresh ───────┘
//!                                                        ▼
//!                                        fetch ─▶ persist ─▶ publish
//! ```

mod flight;
mod hash;
mod refresh;
mod store;

pub use flight::SingleFlight;
pub use hash::{compute_hash, deployment_key};
pub use refresh::fetch_snapshot;
pub use store::EnvelopeStore;

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch, OnceCell};
use tracing::{debug, info, warn};

use crate::config::{DatasetFilter, Settings, SettingsError};
use crate::metadata::{CacheEnvelope, Dataset, Snapshot, Table, WarehouseProvider};
use crate::worker::WorkerError;

const REFRESH_KEY: &str = "refresh";

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A refresh failed; carries the underlying reason.
    #[error("metadata refresh failed: {0}")]
    Unavailable(String),

    #[error("warehouse fetch failed: {0}")]
    Fetch(#[from] WorkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid cache configuration: {0}")]
    Config(#[from] SettingsError),

    /// A freshly assembled snapshot violated its own invariant.
    #[error("snapshot invariant violated: {0}")]
    Invariant(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

type RefreshOutcome = Result<Arc<CacheEnvelope>, Arc<CacheError>>;

/// Read access to the current metadata snapshot.
///
/// The facade depends on this rather than on [`CacheManager`] directly.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Freshest usable snapshot; see [`CacheManager::get_current_snapshot`].
    async fn current_snapshot(&self) -> CacheResult<Arc<Snapshot>>;

    /// Refresh now regardless of TTL.
    async fn force_refresh(&self) -> CacheResult<Arc<Snapshot>>;
}

/// Construction parameters for [`CacheManager`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub project_ids: Vec<String>,
    pub filters: Vec<DatasetFilter>,
    pub ttl_seconds: u64,
    pub fetch_concurrency: usize,
}

impl CacheOptions {
    pub fn from_settings(settings: &Settings) -> CacheResult<Self> {
        Ok(Self {
            project_ids: settings.project_ids(),
            filters: settings.dataset_filters()?,
            ttl_seconds: settings.cache.ttl_seconds,
            fetch_concurrency: settings.cache.fetch_concurrency,
        })
    }
}

/// Owner of the cached snapshot.
pub struct CacheManager {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn WarehouseProvider>,
    store: EnvelopeStore,
    options: CacheOptions,
    current: watch::Sender<Option<Arc<CacheEnvelope>>>,
    loaded: OnceCell<()>,
    flight: SingleFlight<RefreshOutcome>,
    refresh_tx: mpsc::Sender<()>,
}

impl CacheManager {
    /// Create a manager and start its refresh coordinator.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        provider: Arc<dyn WarehouseProvider>,
        store: EnvelopeStore,
        options: CacheOptions,
    ) -> Self {
        let (current, _) = watch::channel(None);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);

        let inner = Arc::new(Inner {
            provider,
            store,
            options,
            current,
            loaded: OnceCell::new(),
            flight: SingleFlight::new(),
            refresh_tx,
        });

        tokio::spawn(run_coordinator(Arc::downgrade(&inner), refresh_rx));
        Self { inner }
    }

    /// Manager for `settings`, storing its envelope under the configured
    /// cache directory.
    pub fn from_settings(
        provider: Arc<dyn WarehouseProvider>,
        settings: &Settings,
    ) -> CacheResult<Self> {
        let store = EnvelopeStore::for_deployment(
            &settings.cache_dir()?,
            &settings.project_ids(),
            &settings.warehouse.dataset_filters,
        )?;
        Ok(Self::new(provider, store, CacheOptions::from_settings(settings)?))
    }

    /// Freshest usable snapshot.
    ///
    /// Blocks on a full fetch only when no snapshot exists in memory or on
    /// disk. A stale snapshot is returned as is and a background refresh is
    /// requested.
    pub async fn get_current_snapshot(&self) -> CacheResult<Arc<Snapshot>> {
        self.inner.ensure_loaded().await;

        let current = self.inner.current.borrow().clone();
        match current {
            Some(envelope) => {
                if envelope.is_stale(Utc::now()) {
                    self.inner.request_refresh();
                }
                Ok(envelope.snapshot.clone())
            }
            None => {
                info!("no cached metadata; fetching synchronously");
                let envelope = self.inner.refresh().await?;
                Ok(envelope.snapshot.clone())
            }
        }
    }

    /// One dataset and its tables. `(None, [])` when absent.
    pub async fn get_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
    ) -> CacheResult<(Option<Dataset>, Vec<Table>)> {
        let snapshot = self.get_current_snapshot().await?;
        let dataset = snapshot.dataset(project_id, dataset_id).cloned();
        let tables = snapshot.tables(project_id, dataset_id).to_vec();
        Ok((dataset, tables))
    }

    /// Datasets of one project, in snapshot order.
    pub async fn get_datasets_for_project(&self, project_id: &str) -> CacheResult<Vec<Dataset>> {
        let snapshot = self.get_current_snapshot().await?;
        Ok(snapshot.datasets(project_id).to_vec())
    }

    /// Full refresh regardless of TTL. Concurrent calls share one fetch.
    pub async fn force_refresh(&self) -> CacheResult<Arc<Snapshot>> {
        let envelope = self.inner.refresh().await?;
        Ok(envelope.snapshot.clone())
    }

    /// Receiver notified on every published envelope.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<CacheEnvelope>>> {
        self.inner.current.subscribe()
    }

    /// Current envelope without triggering any load or refresh.
    pub fn peek(&self) -> Option<Arc<CacheEnvelope>> {
        self.inner.current.borrow().clone()
    }

    pub fn store(&self) -> &EnvelopeStore {
        &self.inner.store
    }
}

#[async_trait]
impl SnapshotSource for CacheManager {
    async fn current_snapshot(&self) -> CacheResult<Arc<Snapshot>> {
        self.get_current_snapshot().await
    }

    async fn force_refresh(&self) -> CacheResult<Arc<Snapshot>> {
        CacheManager::force_refresh(self).await
    }
}

impl Inner {
    /// Load the persisted envelope once per process.
    async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let Some(mut envelope) = self.store.load().await else {
                    return;
                };
                // The configured TTL wins over the one stored with the file.
                envelope.ttl_seconds = self.options.ttl_seconds;
                debug!(
                    last_refreshed = %envelope.last_refreshed,
                    datasets = envelope.snapshot.dataset_count(),
                    "loaded cached metadata from disk"
                );
                let envelope = Arc::new(envelope);
                // Never clobber a snapshot a refresh already published.
                self.current.send_if_modified(|current| {
                    if current.is_none() {
                        *current = Some(envelope);
                        true
                    } else {
                        false
                    }
                });
            })
            .await;
    }

    fn is_stale(&self) -> bool {
        match self.current.borrow().as_ref() {
            Some(envelope) => envelope.is_stale(Utc::now()),
            None => true,
        }
    }

    /// Queue a background refresh. A full queue means one is already pending.
    fn request_refresh(&self) {
        if self.refresh_tx.try_send(()).is_ok() {
            debug!("background refresh requested");
        }
    }

    /// Single-flight refresh. The fetch runs on its own task so it completes,
    /// and clears its flight, even if every waiter goes away.
    async fn refresh(self: &Arc<Self>) -> CacheResult<Arc<CacheEnvelope>> {
        let this = Arc::clone(self);
        let outcome = self
            .flight
            .run(REFRESH_KEY, move || async move {
                this.fetch_and_publish().await.map_err(Arc::new)
            })
            .await;

        match outcome {
            Some(result) => result.map_err(|e| CacheError::Unavailable(e.to_string())),
            None => Err(CacheError::Unavailable("refresh task aborted".to_string())),
        }
    }

    async fn fetch_and_publish(&self) -> CacheResult<Arc<CacheEnvelope>> {
        let started = Instant::now();
        info!(projects = ?self.options.project_ids, "refreshing metadata cache");

        let snapshot = fetch_snapshot(
            self.provider.as_ref(),
            &self.options.project_ids,
            &self.options.filters,
            self.options.fetch_concurrency,
        )
        .await?;
        snapshot.validate().map_err(CacheError::Invariant)?;

        let envelope = Arc::new(CacheEnvelope::new(snapshot, self.options.ttl_seconds));
        if let Err(e) = self.store.save(&envelope).await {
            warn!(path = %self.store.path().display(), error = %e, "failed to persist metadata cache");
        }
        self.current.send_replace(Some(envelope.clone()));

        info!(
            datasets = envelope.snapshot.dataset_count(),
            tables = envelope.snapshot.table_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "metadata cache refreshed"
        );
        Ok(envelope)
    }
}

/// Background refresh loop. Exits when the manager is dropped.
async fn run_coordinator(inner: Weak<Inner>, mut requests: mpsc::Receiver<()>) {
    while requests.recv().await.is_some() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.is_stale() {
            debug!("skipping refresh request; snapshot already fresh");
            continue;
        }
        if let Err(e) = inner.refresh().await {
            warn!(error = %e, "background refresh failed; serving stale metadata");
        }
    }
}
