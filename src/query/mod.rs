//! Query execution and result export.
//!
//! ```text
//! sql ──► analyzer ──► dry run ──► budget check ──► start_query ──► query_results
//!                                                                      │
//!                           ┌──────────────────────────┴───────┐
//!                           ▼                                  ▼
//!                   capped Vec<Record>                streamed CSV / JSONL
//!                   (execute_query)                   (save_query_result)
//! ```

mod convert;
mod executor;
mod export;

pub use convert::{convert_row, convert_value, Record};
pub use executor::{
    DryRunResult, ExecutionFailure, ExecutionResult, ExecutorConfig, ExportDescriptor,
    QueryExecutor,
};
pub use export::{validate_output_path, write_export, ExportFormat, ExportSummary};
