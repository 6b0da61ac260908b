//! Keyword search over a metadata snapshot.
//!
//! The index is a flat list of documents (datasets, then tables, then
//! columns, each in snapshot order) rebuilt from the snapshot on every
//! search. Matching is a case-insensitive substring test against a
//! document's name and description; there is no scoring.

use serde::Serialize;

use crate::metadata::{Column, Snapshot};

/// What a document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Dataset,
    Table,
    Column,
}

/// Which field of a document matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLocation {
    Name,
    Description,
}

/// One searchable entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchDocument {
    pub kind: DocumentKind,
    pub project_id: String,
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    /// Dotted path within the table for nested fields (`address.city`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_path: Option<String>,
    /// `project.dataset[.table[.column_path]]`
    pub qualified_path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared type, columns only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl SearchDocument {
    /// Where `needle` (already lowercased) occurs. Name wins over description.
    fn match_location(&self, needle: &str) -> Option<MatchLocation> {
        if self.name.to_lowercase().contains(needle) {
            return Some(MatchLocation::Name);
        }
        self.description
            .as_deref()
            .filter(|d| d.to_lowercase().contains(needle))
            .map(|_| MatchLocation::Description)
    }
}

/// A matched document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub document: SearchDocument,
    pub matched_in: MatchLocation,
}

/// Documents derived from one snapshot.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    documents: Vec<SearchDocument>,
}

impl SearchIndex {
    /// Derive documents for every dataset, table and column.
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut datasets = Vec::new();
        let mut tables = Vec::new();
        let mut columns = Vec::new();

        for dataset in snapshot.all_datasets() {
            let dataset_path = dataset.qualified();
            datasets.push(SearchDocument {
                kind: DocumentKind::Dataset,
                project_id: dataset.project_id.clone(),
                dataset_id: dataset.dataset_id.clone(),
                table_id: None,
                column_path: None,
                qualified_path: dataset_path.clone(),
                name: dataset.dataset_id.clone(),
                description: dataset.description.clone(),
                data_type: None,
            });

            for table in snapshot.tables(&dataset.project_id, &dataset.dataset_id) {
                let table_path = table.full_table_id();
                tables.push(SearchDocument {
                    kind: DocumentKind::Table,
                    project_id: dataset.project_id.clone(),
                    dataset_id: dataset.dataset_id.clone(),
                    table_id: Some(table.table_id().to_string()),
                    column_path: None,
                    qualified_path: table_path.clone(),
                    name: table.table_id().to_string(),
                    description: table.description.clone(),
                    data_type: None,
                });

                let owner = ColumnOwner {
                    project_id: &dataset.project_id,
                    dataset_id: &dataset.dataset_id,
                    table_id: table.table_id(),
                    table_path: &table_path,
                };
                collect_columns(&owner, &table.columns, None, &mut columns);
            }
        }

        datasets.extend(tables);
        datasets.extend(columns);
        Self {
            documents: datasets,
        }
    }

    pub fn documents(&self) -> &[SearchDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Case-insensitive substring search. An empty keyword matches everything.
    pub fn search(&self, keyword: &str) -> Vec<SearchHit> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return self.all_hits();
        }

        self.documents
            .iter()
            .filter_map(|doc| {
                doc.match_location(&needle).map(|matched_in| SearchHit {
                    document: doc.clone(),
                    matched_in,
                })
            })
            .collect()
    }

    /// Search a free-form query: each term is matched separately and a
    /// document is returned once if any term matches it.
    ///
    /// Terms are split on whitespace, commas and dots, so a qualified name
    /// like `sales.customers` looks for both parts. Quotes and backticks
    /// are stripped.
    pub fn search_terms(&self, query: &str) -> Vec<SearchHit> {
        let terms = split_terms(query);
        if terms.is_empty() {
            return self.all_hits();
        }

        self.documents
            .iter()
            .filter_map(|doc| {
                terms
                    .iter()
                    .find_map(|term| doc.match_location(term))
                    .map(|matched_in| SearchHit {
                        document: doc.clone(),
                        matched_in,
                    })
            })
            .collect()
    }

    fn all_hits(&self) -> Vec<SearchHit> {
        self.documents
            .iter()
            .map(|doc| SearchHit {
                document: doc.clone(),
                matched_in: MatchLocation::Name,
            })
            .collect()
    }
}

struct ColumnOwner<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
    table_path: &'a str,
}

fn collect_columns(
    owner: &ColumnOwner<'_>,
    columns: &[Column],
    parent: Option<&str>,
    out: &mut Vec<SearchDocument>,
) {
    for column in columns {
        let path = match parent {
            Some(parent) => format!("{parent}.{}", column.name),
            None => column.name.clone(),
        };

        out.push(SearchDocument {
            kind: DocumentKind::Column,
            project_id: owner.project_id.to_string(),
            dataset_id: owner.dataset_id.to_string(),
            table_id: Some(owner.table_id.to_string()),
            column_path: Some(path.clone()),
            qualified_path: format!("{}.{}", owner.table_path, path),
            name: column.name.clone(),
            description: column.description.clone(),
            data_type: Some(column.data_type.clone()),
        });

        if !column.fields.is_empty() {
            collect_columns(owner, &column.fields, Some(&path), out);
        }
    }
}

/// Lowercased, de-duplicated search terms.
fn split_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in query.split(|c: char| c.is_whitespace() || c == ',' || c == '.') {
        let term: String = raw
            .chars()
            .filter(|c| *c != '"' && *c != '`')
            .collect::<String>()
            .to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}
