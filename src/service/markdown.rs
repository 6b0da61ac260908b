//! Markdown rendering of service results.

use serde_json::Value;

use crate::metadata::{Column, Dataset, Table};
use crate::query::{DryRunResult, ExecutionResult, ExportDescriptor, Record};
use crate::search::{DocumentKind, MatchLocation, SearchHit};

/// Rows shown in an execution result table.
const MAX_TABLE_ROWS: usize = 20;
/// Longest cell before truncation.
const MAX_CELL_CHARS: usize = 50;

/// Human-readable byte size (`1.5 KB`).
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}

/// `1234567` as `1,234,567`.
fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn bytes_line(label: &str, bytes: u64) -> String {
    format!(
        "- **{label}**: {} ({} bytes)\n",
        format_bytes(bytes),
        group_digits(bytes)
    )
}

pub fn render_datasets(datasets: &[Dataset]) -> String {
    if datasets.is_empty() {
        return "No datasets found.\n".to_string();
    }

    let mut out = String::new();
    for dataset in datasets {
        out.push_str(&format!("## Dataset: `{}`\n\n", dataset.qualified()));
        if let Some(description) = &dataset.description {
            out.push_str(&format!("{description}\n\n"));
        }
        if let Some(location) = &dataset.location {
            out.push_str(&format!("**Location:** {location}\n\n"));
        }
        out.push_str(&format!("**Tables:** {}\n\n", dataset.table_ids.len()));
    }
    out
}

pub fn render_tables(tables: &[Table]) -> String {
    if tables.is_empty() {
        return "No tables found.\n".to_string();
    }

    let mut out = String::new();
    for table in tables {
        out.push_str(&format!("### Table: `{}`\n\n", table.full_table_id()));
        if let Some(description) = &table.description {
            out.push_str(&format!("{description}\n\n"));
        }
        if let Some(rows) = table.num_rows {
            out.push_str(&format!("**Rows:** {}\n\n", group_digits(rows)));
        }
        if !table.columns.is_empty() {
            out.push_str("| Column | Type | Mode | Description |\n");
            out.push_str("|---|---|---|---|\n");
            for column in &table.columns {
                column_rows(&mut out, column, "");
            }
            out.push('\n');
        }
    }
    out
}

/// One row per column, nested fields flattened to dotted paths.
fn column_rows(out: &mut String, column: &Column, prefix: &str) {
    let path = format!("{prefix}{}", column.name);
    out.push_str(&format!(
        "| {} | {} | {} | {} |\n",
        path,
        column.data_type,
        column.mode.as_str(),
        escape_cell(column.description.as_deref().unwrap_or(""))
    ));
    let nested = format!("{path}.");
    for field in &column.fields {
        column_rows(out, field, &nested);
    }
}

pub fn render_search(query: &str, hits: &[SearchHit]) -> String {
    let mut out = format!(
        "## Search Results: `{query}`\n\nFound **{}** results.\n\n",
        hits.len()
    );

    for (kind, heading) in [
        (DocumentKind::Dataset, "Datasets"),
        (DocumentKind::Table, "Tables"),
        (DocumentKind::Column, "Columns"),
    ] {
        let group: Vec<&SearchHit> = hits.iter().filter(|h| h.document.kind == kind).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("### {heading}\n\n"));
        for hit in group {
            let matched = match hit.matched_in {
                MatchLocation::Name => "name",
                MatchLocation::Description => "description",
            };
            let type_suffix = hit
                .document
                .data_type
                .as_deref()
                .map(|t| format!(" `{t}`"))
                .unwrap_or_default();
            out.push_str(&format!(
                "- **{}**{type_suffix} (matched in {matched})\n",
                hit.document.qualified_path
            ));
        }
        out.push('\n');
    }
    out
}

pub fn render_dry_run(result: &DryRunResult) -> String {
    let mut out = String::from("# Query Scan Amount Check\n\n");

    if let Some(error) = &result.error_message {
        out.push_str("## Check Information\n");
        out.push_str("- **Status**: Failed\n");
        out.push_str(&format!("- **Project ID**: {}\n\n", result.project_id));
        out.push_str(&error_block(error));
        return out;
    }

    let status = if result.within_limit {
        "Safe"
    } else {
        "Caution Required"
    };
    out.push_str("## Check Information\n");
    out.push_str(&format!("- **Status**: {status}\n"));
    out.push_str(&format!("- **Project ID**: {}\n\n", result.project_id));
    out.push_str("## Expected Resource Usage\n");
    out.push_str(&bytes_line("Bytes to be Processed", result.total_bytes_processed));
    out.push_str(&bytes_line("Bytes to be Billed", result.total_bytes_billed));
    out.push_str(&bytes_line("Scan Limit", result.max_scan_bytes));
    out.push('\n');

    out.push_str("## Safety Assessment\n");
    if result.within_limit {
        out.push_str("The estimated scan is within the configured limit.\n");
    } else {
        out.push_str("The estimated scan exceeds the configured limit. Consider:\n");
        out.push_str("- filtering with a WHERE clause\n");
        out.push_str("- restricting the date range of partitioned tables\n");
        out.push_str("- selecting only the columns you need\n");
    }
    out
}

pub fn render_execution(result: &ExecutionResult) -> String {
    let mut out = String::from("# Query Execution Result\n\n");
    out.push_str("## Query Information\n");
    out.push_str(&format!(
        "- **Status**: {}\n",
        if result.success { "Success" } else { "Failed" }
    ));
    out.push_str(&format!(
        "- **Project ID**: {}\n",
        result.project_id.as_deref().unwrap_or("Default")
    ));
    out.push_str(&format!(
        "- **Job ID**: {}\n",
        result.job_id.as_deref().unwrap_or("N/A")
    ));
    out.push_str(&format!(
        "- **Execution Time**: {} ms\n",
        group_digits(result.elapsed_ms)
    ));
    if result.limit_was_modified {
        if let Some(applied) = result.applied_limit {
            out.push_str(&format!("- **Applied LIMIT**: {applied}\n"));
        }
    }
    out.push('\n');

    if !result.success {
        out.push_str(&error_block(
            result.error_message.as_deref().unwrap_or("Unknown error"),
        ));
        return out;
    }

    out.push_str("## Resource Usage\n");
    out.push_str(&bytes_line(
        "Bytes Processed",
        result.total_bytes_processed.unwrap_or(0),
    ));
    out.push_str(&bytes_line("Bytes Billed", result.total_bytes_billed.unwrap_or(0)));
    out.push_str(&format!(
        "- **Rows Returned**: {}\n",
        group_digits(result.row_count as u64)
    ));

    if !result.rows.is_empty() {
        out.push('\n');
        out.push_str(&rows_table(&result.rows));
    }
    out
}

fn rows_table(rows: &[Record]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let names: Vec<&str> = first.iter().map(|(name, _)| name).collect();

    let mut out = String::from("## Query Results\n\n");
    out.push_str(&format!("| {} |\n", names.join(" | ")));
    out.push_str(&format!("| {} |\n", vec!["---"; names.len()].join(" | ")));
    for row in rows.iter().take(MAX_TABLE_ROWS) {
        let cells: Vec<String> = row.values().map(cell_text).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    if rows.len() > MAX_TABLE_ROWS {
        out.push_str(&format!("\n*... {} more rows*\n", rows.len() - MAX_TABLE_ROWS));
    }
    out
}

fn cell_text(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let text = if text.chars().count() > MAX_CELL_CHARS {
        let head: String = text.chars().take(MAX_CELL_CHARS - 3).collect();
        format!("{head}...")
    } else {
        text
    };
    escape_cell(&text)
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

pub fn render_export(descriptor: &ExportDescriptor) -> String {
    let mut out = String::from("# Query Result Saved\n\n");
    out.push_str(&format!("- **File Path**: `{}`\n", descriptor.path.display()));
    out.push_str(&format!(
        "- **Format**: {}\n",
        descriptor.format.to_string().to_uppercase()
    ));
    out.push_str(&format!(
        "- **Rows Saved**: {}\n",
        group_digits(descriptor.rows_written)
    ));
    out.push_str(&bytes_line("File Size", descriptor.bytes_written));
    out.push_str(&format!(
        "- **Execution Time**: {} ms\n",
        group_digits(descriptor.elapsed_ms)
    ));
    if let Some(processed) = descriptor.total_bytes_processed {
        out.push_str(&bytes_line("Data Processed", processed));
    }
    out
}

fn error_block(message: &str) -> String {
    format!("## Error Details\n```\n{message}\n```\n")
}
