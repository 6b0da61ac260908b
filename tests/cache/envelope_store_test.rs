use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;

use bqmeta::cache::EnvelopeStore;
use bqmeta::metadata::{CacheEnvelope, Column, Dataset, Snapshot, Table, TableRef};

fn envelope() -> CacheEnvelope {
    let orders = Table::new(
        TableRef::new("analytics", "sales", "orders"),
        vec![
            Column::new("order_id", "INTEGER"),
            Column::new("shipping", "RECORD").with_fields(vec![Column::new("city", "STRING")]),
        ],
    )
    .with_description("All orders");
    let snapshot = Snapshot::assemble(
        vec![(
            "analytics".to_string(),
            vec![(
                Dataset::new("analytics", "sales").with_description("Sales data"),
                vec![orders],
            )],
        )],
        Utc::now(),
    );
    CacheEnvelope::new(snapshot, 900)
}

async fn rewrite_json(path: &PathBuf, edit: impl FnOnce(&mut Value)) {
    let mut json: Value = serde_json::from_slice(&tokio::fs::read(path).await.unwrap()).unwrap();
    edit(&mut json);
    tokio::fs::write(path, serde_json::to_vec(&json).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_round_trip_preserves_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let store = EnvelopeStore::at(dir.path().join("cache").join("envelope.json"));
    let original = envelope();

    store.save(&original).await.unwrap();
    let loaded = store.load().await.unwrap();

    assert_eq!(loaded, original);
    assert_eq!(loaded.snapshot.tables("analytics", "sales")[0].columns[1].fields.len(), 1);
}

#[tokio::test]
async fn test_save_replaces_previous_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let store = EnvelopeStore::at(dir.path().join("envelope.json"));

    store.save(&envelope()).await.unwrap();
    let empty = CacheEnvelope::new(Snapshot::empty(Utc::now()), 60);
    store.save(&empty).await.unwrap();

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.snapshot.dataset_count(), 0);
    assert_eq!(loaded.ttl_seconds, 60);

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_version_mismatch_loads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("envelope.json");
    let store = EnvelopeStore::at(&path);
    store.save(&envelope()).await.unwrap();

    rewrite_json(&path, |json| json["format_version"] = Value::from(99)).await;

    assert!(store.load().await.is_none());
}

#[tokio::test]
async fn test_dangling_table_id_loads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("envelope.json");
    let store = EnvelopeStore::at(&path);
    store.save(&envelope()).await.unwrap();

    rewrite_json(&path, |json| {
        json["snapshot"]["datasets"]["analytics"][0]["table_ids"]
            .as_array_mut()
            .unwrap()
            .push(Value::from("ghost"));
    })
    .await;

    assert!(store.load().await.is_none());
}

#[tokio::test]
async fn test_truncated_file_loads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("envelope.json");
    let store = EnvelopeStore::at(&path);
    store.save(&envelope()).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(store.load().await.is_none());
}

#[test]
fn test_deployment_file_names() {
    let base = PathBuf::from("/var/cache/bqmeta");
    let projects = vec!["analytics".to_string()];

    let a = EnvelopeStore::for_deployment(&base, &projects, &[]).unwrap();
    let b = EnvelopeStore::for_deployment(&base, &projects, &[]).unwrap();
    let filtered =
        EnvelopeStore::for_deployment(&base, &projects, &["analytics.sales".to_string()]).unwrap();

    assert_eq!(a.path(), b.path());
    assert_ne!(a.path(), filtered.path());

    let name = a.path().file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("envelope-"));
    assert!(name.ends_with(".json"));
    assert_eq!(name.len(), "envelope-".len() + 16 + ".json".len());
}
