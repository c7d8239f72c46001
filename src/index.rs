use crate::chunking::ChunkingConfig;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "index.json";
const MANIFEST_VERSION: u32 = 1;

/// One indexed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub document_id: String,
    pub path: PathBuf,
    pub mime_type: String,
    pub chunk_count: usize,
}

/// What was indexed and where its vectors live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    /// Qdrant collection holding the chunk vectors
    pub collection: String,
    /// Model the chunks were embedded with; queries must use the same one
    pub embedding_model: String,
    pub vector_size: u64,
    pub chunking: ChunkingConfig,
    pub documents: Vec<DocumentEntry>,
}

impl IndexManifest {
    pub fn new(
        collection: String,
        embedding_model: String,
        vector_size: u64,
        chunking: ChunkingConfig,
        documents: Vec<DocumentEntry>,
    ) -> Self {
        IndexManifest {
            version: MANIFEST_VERSION,
            collection,
            embedding_model,
            vector_size,
            chunking,
            documents,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunk_count).sum()
    }

    /// Path of the manifest inside a storage directory
    pub fn path_in<P: AsRef<Path>>(storage_dir: P) -> PathBuf {
        storage_dir.as_ref().join(MANIFEST_FILE)
    }

    /// Write the manifest to `storage_dir`, replacing any previous one
    pub fn save<P: AsRef<Path>>(&self, storage_dir: P) -> Result<()> {
        let storage_dir = storage_dir.as_ref();
        fs::create_dir_all(storage_dir).with_context(|| {
            format!("Failed to create storage directory {}", storage_dir.display())
        })?;

        let path = Self::path_in(storage_dir);
        let tmp_path = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(self)?;

        fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        info!("Saved index manifest to {}", path.display());
        Ok(())
    }

    /// Read a manifest previously written by [`IndexManifest::save`]
    pub fn load<P: AsRef<Path>>(storage_dir: P) -> Result<Self> {
        let path = Self::path_in(storage_dir);
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "No persisted index at {}; run with --build first",
                path.display()
            ));
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest: IndexManifest = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(anyhow::anyhow!(
                "Unsupported index version {} in {} (expected {})",
                manifest.version,
                path.display(),
                MANIFEST_VERSION
            ));
        }

        Ok(manifest)
    }
}
