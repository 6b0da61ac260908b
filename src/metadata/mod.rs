//! Warehouse metadata: entities and the remote gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    WarehouseProvider (trait)                    │
//! │  - list_datasets()         - dry_run()                          │
//! │  - list_tables()           - start_query() → job id             │
//! │  - get_table_schema()      - query_results() → QueryJob (pages) │
//! │                            - cancel_query()                     │
//! └─────────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 WorkerWarehouseProvider                         │
//! │              (NDJSON over stdin/stdout)                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use bqmeta::metadata::{WarehouseProvider, WorkerWarehouseProvider};
//! use bqmeta::worker::WorkerClient;
//!
//! let client = WorkerClient::spawn("./bqmeta-worker").await?;
//! let provider = WorkerWarehouseProvider::new(Arc::new(client), Duration::from_secs(300));
//!
//! let datasets = provider.list_datasets("analytics-prod").await?;
//! let table = provider.get_table_schema("analytics-prod", "sales", "orders").await?;
//! ```

mod provider;
mod types;
mod worker_provider;

pub use provider::{MetadataResult, WarehouseProvider};
pub use types::*;
pub use worker_provider::WorkerWarehouseProvider;
