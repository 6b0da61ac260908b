//! Content hashing for cache file names.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of the JSON form of `value`, as 64 lowercase hex chars.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Short key identifying one deployment: its projects and dataset filters.
///
/// Two deployments sharing a cache directory but serving different projects
/// never read each other's envelope.
pub fn deployment_key(
    project_ids: &[String],
    dataset_filters: &[String],
) -> Result<String, serde_json::Error> {
    #[derive(Serialize)]
    struct Key<'a> {
        projects: &'a [String],
        filters: &'a [String],
    }

    let hash = compute_hash(&Key {
        projects: project_ids,
        filters: dataset_filters,
    })?;
    Ok(hash[..16].to_string())
}
