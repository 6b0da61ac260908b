//! Export of query results to CSV or JSON Lines files.
//!
//! Destinations are validated against the export root before anything else
//! happens. Rows are streamed page by page into a hidden temporary file
//! beside the destination, which is renamed into place only after
//! everything was written and synced.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::convert::{convert_row, Record};
use crate::error::{ServiceError, ServiceResult};
use crate::metadata::{Column, RowPages};

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Jsonl,
}

impl FromStr for ExportFormat {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "jsonl" => Ok(Self::Jsonl),
            _ => Err(ServiceError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
        })
    }
}

// ============================================================================
// Path validation
// ============================================================================

/// Resolve `requested` against `root` and make sure it stays inside.
///
/// Relative paths are taken relative to the root. Any `..` segment is
/// refused outright, as is anything that resolves (through symlinks of
/// existing ancestors included) outside the root or to the root itself.
pub fn validate_output_path(root: &Path, requested: &str) -> ServiceResult<PathBuf> {
    let invalid = |why: &str| ServiceError::InvalidPath(format!("{requested}: {why}"));

    if requested.trim().is_empty() {
        return Err(invalid("empty path"));
    }
    let requested_path = Path::new(requested);
    if requested_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(invalid("path traversal segments are not allowed"));
    }

    let cwd = std::env::current_dir().map_err(|e| invalid(&e.to_string()))?;
    let root = normalize(&cwd.join(root));
    let candidate = normalize(&root.join(requested_path));

    if candidate == root || !candidate.starts_with(&root) {
        return Err(invalid(&format!(
            "must be a file inside the export root {}",
            root.display()
        )));
    }

    // Symlinked ancestors must not lead out of the root either.
    let real_root = resolve_existing(&root);
    let real_candidate = resolve_existing(&candidate);
    if !real_candidate.starts_with(&real_root) {
        return Err(invalid("resolves outside the export root"));
    }

    Ok(candidate)
}

/// Lexical normalization: drop `.` segments. `..` never reaches here.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            return rest.iter().rev().fold(real, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Counts reported after a successful export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportSummary {
    pub rows_written: u64,
    pub bytes_written: u64,
}

/// Stream every page of `pages` into `path`.
///
/// On failure the partial file is removed and nothing appears at `path`.
pub async fn write_export(
    path: &Path,
    format: ExportFormat,
    include_header: bool,
    schema: &[Column],
    pages: RowPages,
) -> ServiceResult<ExportSummary> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ServiceError::Export)?;
    }

    let tmp = temp_path(path);
    let result = write_to(&tmp, format, include_header, schema, pages).await;

    match result {
        Ok(summary) => {
            if let Err(e) = tokio::fs::rename(&tmp, path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(ServiceError::Export(e));
            }
            debug!(path = %path.display(), rows = summary.rows_written, "export written");
            Ok(summary)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "failed to remove partial export");
                }
            }
            Err(e)
        }
    }
}

async fn write_to(
    tmp: &Path,
    format: ExportFormat,
    include_header: bool,
    schema: &[Column],
    mut pages: RowPages,
) -> ServiceResult<ExportSummary> {
    let file = tokio::fs::File::create(tmp)
        .await
        .map_err(ServiceError::Export)?;
    let mut out = CountingWriter::new(BufWriter::new(file));

    if format == ExportFormat::Csv && include_header {
        let header: Vec<String> = schema.iter().map(|c| csv_field(&c.name)).collect();
        out.write_line(&header.join(","), CSV_EOL).await?;
    }

    let mut rows_written = 0u64;
    while let Some(page) = pages
        .try_next()
        .await
        .map_err(|e| ServiceError::RemoteGateway(e.to_string()))?
    {
        for raw in &page {
            let record = convert_row(schema, raw);
            match format {
                ExportFormat::Csv => out.write_line(&csv_line(&record), CSV_EOL).await?,
                ExportFormat::Jsonl => {
                    let line = serde_json::to_string(&record)
                        .map_err(|e| ServiceError::Export(io::Error::new(io::ErrorKind::InvalidData, e)))?;
                    out.write_line(&line, "\n").await?
                }
            }
            rows_written += 1;
        }
    }

    let bytes_written = out.finish().await?;
    Ok(ExportSummary {
        rows_written,
        bytes_written,
    })
}

const CSV_EOL: &str = "\r\n";

struct CountingWriter {
    inner: BufWriter<tokio::fs::File>,
    bytes: u64,
}

impl CountingWriter {
    fn new(inner: BufWriter<tokio::fs::File>) -> Self {
        Self { inner, bytes: 0 }
    }

    async fn write_line(&mut self, line: &str, eol: &str) -> ServiceResult<()> {
        self.inner
            .write_all(line.as_bytes())
            .await
            .map_err(ServiceError::Export)?;
        self.inner
            .write_all(eol.as_bytes())
            .await
            .map_err(ServiceError::Export)?;
        self.bytes += (line.len() + eol.len()) as u64;
        Ok(())
    }

    async fn finish(mut self) -> ServiceResult<u64> {
        self.inner.flush().await.map_err(ServiceError::Export)?;
        self.inner
            .get_ref()
            .sync_all()
            .await
            .map_err(ServiceError::Export)?;
        Ok(self.bytes)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    path.with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4().simple()))
}

fn csv_line(record: &Record) -> String {
    record
        .values()
        .map(|value| csv_field(&csv_text(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Cell text: nulls empty, nested values as compact JSON.
fn csv_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// RFC 4180 quoting.
fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
