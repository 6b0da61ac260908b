//! # bqmeta
//!
//! Cached warehouse metadata, keyword search and guarded query execution.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 service::MetadataService                 │
//! │   datasets · tables · search · dry run · query · save    │
//! └─────────────────────────────────────────────────────────┘
//!          │                    │                  │
//!          ▼                    ▼                  ▼
//! ┌─────────────────┐  ┌────────────────┐  ┌────────────────┐
//! │ cache           │  │ search         │  │ query          │
//! │ TTL snapshot +  │  │ index built    │  │ sql analyzer + │
//! │ background      │  │ per request    │  │ executor +     │
//! │ refresh         │  │                │  │ exports        │
//! └─────────────────┘  └────────────────┘  └────────────────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        metadata::WarehouseProvider (trait seam)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [NDJSON over stdin/stdout]
//! ┌─────────────────────────────────────────────────────────┐
//! │                  warehouse worker process                │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod query;
pub mod search;
pub mod service;
pub mod sql;
pub mod worker;

pub use error::{ServiceError, ServiceResult};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::{CacheManager, SnapshotSource};
    pub use crate::config::Settings;
    pub use crate::error::{ServiceError, ServiceResult};
    pub use crate::metadata::{
        Column, ColumnMode, Dataset, Snapshot, Table, TableRef, WarehouseProvider,
    };
    pub use crate::query::{
        DryRunResult, ExecutionFailure, ExecutionResult, ExportDescriptor, ExportFormat,
        QueryExecutor,
    };
    pub use crate::search::{SearchHit, SearchIndex};
    pub use crate::service::MetadataService;
}
