//! On-disk envelope persistence.
//!
//! One JSON file per deployment. Writes go to a temporary sibling which is
//! fsynced and renamed over the target, so readers only ever see a complete
//! file. Anything unreadable loads as "no cache".

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::hash::deployment_key;
use super::CacheResult;
use crate::metadata::{CacheEnvelope, ENVELOPE_FORMAT_VERSION};

/// File-backed store for a single [`CacheEnvelope`].
#[derive(Debug, Clone)]
pub struct EnvelopeStore {
    path: PathBuf,
}

impl EnvelopeStore {
    /// Store at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for a deployment under `base_dir`.
    pub fn for_deployment(
        base_dir: &Path,
        project_ids: &[String],
        dataset_filters: &[String],
    ) -> CacheResult<Self> {
        let key = deployment_key(project_ids, dataset_filters)?;
        Ok(Self::at(base_dir.join(format!("envelope-{key}.json"))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the envelope back.
    ///
    /// Missing, unreadable, corrupt, wrong-version and invariant-violating
    /// files all yield `None`.
    pub async fn load(&self) -> Option<CacheEnvelope> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cache file");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cache file unreadable");
                return None;
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cache file corrupt");
                return None;
            }
        };

        if envelope.format_version != ENVELOPE_FORMAT_VERSION {
            warn!(
                found = envelope.format_version,
                expected = ENVELOPE_FORMAT_VERSION,
                "cache file version mismatch"
            );
            return None;
        }

        if let Err(why) = envelope.snapshot.validate() {
            warn!(path = %self.path.display(), %why, "cache file fails invariant check");
            return None;
        }

        Some(envelope)
    }

    /// Atomically replace the stored envelope.
    pub async fn save(&self, envelope: &CacheEnvelope) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec(envelope)?;
        let tmp = self.temp_path();

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "cache persisted");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "envelope".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }
}
