//! Durable snapshot of the chunk store and its vectors.
//!
//! The lexical index is not persisted: it is derived from chunk text and is
//! rebuilt on load. Vectors are persisted together with the embedder id and
//! metric they were produced under so that a provider change can be detected.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::store::ChunkStore;
use crate::types::{ChunkId, Metric};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredVector {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub store: ChunkStore,
    pub embedder_id: Option<String>,
    pub metric: Metric,
    #[serde(default)]
    pub vectors: Vec<StoredVector>,
}

impl Snapshot {
    /// Write atomically: serialize into a temp file beside `path`, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, self).map_err(|e| Error::Persistence(e.to_string()))?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| Error::Persistence(e.to_string()))?;
        tracing::info!(
            path = %path.display(),
            chunks = self.store.chunk_count(),
            vectors = self.vectors.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Read a snapshot; `Ok(None)` when nothing has been saved at `path` yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let snapshot: Self = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Persistence(format!("{}: {e}", path.display())))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Persistence(format!(
                "{}: unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                path.display(),
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }
}
