//! Warehouse worker communication.
//!
//! Warehouse access (listing, dry runs, query execution) lives in a sidecar
//! worker process that holds the cloud credentials. This crate talks to it
//! over NDJSON on stdin/stdout.
//!
//! ```text
//! ┌──────────────────────────────┐   stdin (NDJSON)   ┌────────────────────┐
//! │ WorkerClient (tokio)         │ ─────────────────▶ │ bqmeta-worker      │
//! │  - request ids (uuid v4)     │                    │  - warehouse REST  │
//! │  - pending map + reader task │ ◀───────────────── │  - credentials     │
//! └──────────────────────────────┘   stdout (NDJSON)  └────────────────────┘
//! ```

mod client;
mod error;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
