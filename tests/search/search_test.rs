use chrono::Utc;

use bqmeta::metadata::{Column, Dataset, Snapshot, Table, TableRef};
use bqmeta::search::{DocumentKind, MatchLocation, SearchHit, SearchIndex};

fn snapshot() -> Snapshot {
    let table = |dataset: &str, name: &str, columns: Vec<Column>| {
        Table::new(TableRef::new("analytics", dataset, name), columns)
    };

    Snapshot::assemble(
        vec![(
            "analytics".to_string(),
            vec![
                (
                    Dataset::new("analytics", "sales").with_description("Revenue and orders"),
                    vec![
                        table(
                            "sales",
                            "orders",
                            vec![
                                Column::new("order_id", "INTEGER"),
                                Column::new("status", "STRING")
                                    .with_description("Fulfilment state"),
                            ],
                        ),
                        table(
                            "sales",
                            "customers",
                            vec![
                                Column::new("id", "INTEGER"),
                                Column::new("segment", "STRING")
                                    .with_description("Marketing segment of the customer"),
                            ],
                        )
                        .with_description("One row per customer"),
                    ],
                ),
                (
                    Dataset::new("analytics", "marketing"),
                    vec![table(
                        "marketing",
                        "campaigns",
                        vec![Column::new("audience", "RECORD").with_fields(vec![
                            Column::new("region", "STRING"),
                            Column::new("size", "INTEGER"),
                        ])],
                    )],
                ),
            ],
        )],
        Utc::now(),
    )
}

fn paths(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.document.qualified_path.as_str()).collect()
}

#[test]
fn test_keyword_matches_table_and_columns_not_siblings() {
    let index = SearchIndex::build(&snapshot());
    let hits = index.search("cust");

    assert_eq!(
        paths(&hits),
        vec!["analytics.sales.customers", "analytics.sales.customers.segment"]
    );
    assert!(!paths(&hits).contains(&"analytics.sales.orders"));
    assert_eq!(hits[0].matched_in, MatchLocation::Name);
    assert_eq!(hits[1].matched_in, MatchLocation::Description);
}

#[test]
fn test_search_is_case_insensitive() {
    let index = SearchIndex::build(&snapshot());
    assert_eq!(index.search("CUST"), index.search("cust"));
    assert_eq!(index.search("Cust"), index.search("cust"));
}

#[test]
fn test_results_grouped_datasets_tables_columns() {
    let index = SearchIndex::build(&snapshot());
    let hits = index.search("s");

    let kinds: Vec<DocumentKind> = hits.iter().map(|h| h.document.kind).collect();
    let mut sorted = kinds.clone();
    sorted.sort();
    assert_eq!(kinds, sorted);
    assert!(kinds.contains(&DocumentKind::Dataset));
    assert!(kinds.contains(&DocumentKind::Column));
}

#[test]
fn test_nested_fields_are_searchable() {
    let index = SearchIndex::build(&snapshot());
    let hits = index.search("region");

    assert_eq!(hits.len(), 1);
    let doc = &hits[0].document;
    assert_eq!(doc.kind, DocumentKind::Column);
    assert_eq!(doc.column_path.as_deref(), Some("audience.region"));
    assert_eq!(doc.qualified_path, "analytics.marketing.campaigns.audience.region");
    assert_eq!(doc.data_type.as_deref(), Some("STRING"));
}

#[test]
fn test_no_match_and_empty_keyword() {
    let index = SearchIndex::build(&snapshot());
    assert!(index.search("zzz").is_empty());
    assert_eq!(index.search("").len(), index.len());
}

#[test]
fn test_qualified_query_matches_each_part() {
    let index = SearchIndex::build(&snapshot());
    let hits = index.search_terms("`marketing.campaigns`");

    let found = paths(&hits);
    assert!(found.contains(&"analytics.marketing"));
    assert!(found.contains(&"analytics.marketing.campaigns"));
    assert!(found.contains(&"analytics.sales.customers.segment"));
    let unique: std::collections::HashSet<_> = found.iter().collect();
    assert_eq!(unique.len(), found.len());
}

#[test]
fn test_index_is_deterministic() {
    let snapshot = snapshot();
    let a = SearchIndex::build(&snapshot);
    let b = SearchIndex::build(&snapshot);
    assert_eq!(a.documents(), b.documents());
}
