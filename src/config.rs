use crate::chunking::ChunkingConfig;
use anyhow::{bail, Result};

/// Fixed chunking and prompt parameters for the service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    /// Maximum number of tokens the model accepts in a single prompt
    pub max_input_size: usize,
    /// Number of tokens reserved for the model's answer
    pub num_output: usize,
    /// Overlap between neighbouring chunks, in tokens
    pub max_chunk_overlap: usize,
    /// Upper bound for the size of an indexed chunk, in tokens
    pub chunk_size_limit: usize,
    pub temperature: f32,
    /// Number of chunks retrieved per query
    pub similarity_top_k: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            max_input_size: 4096,
            num_output: 512,
            max_chunk_overlap: 20,
            chunk_size_limit: 600,
            temperature: 0.0,
            similarity_top_k: 2,
        }
    }
}

impl ServiceSettings {
    /// Chunking parameters used while building the index
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size_limit,
            chunk_overlap: self.max_chunk_overlap,
        }
    }

    /// Reject parameter combinations that leave no room for chunks or prompts
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_limit == 0 {
            bail!("chunk_size_limit must be positive");
        }
        if self.max_chunk_overlap >= self.chunk_size_limit {
            bail!(
                "max_chunk_overlap ({}) must be smaller than chunk_size_limit ({})",
                self.max_chunk_overlap,
                self.chunk_size_limit
            );
        }
        if self.num_output >= self.max_input_size {
            bail!(
                "num_output ({}) must be smaller than max_input_size ({})",
                self.num_output,
                self.max_input_size
            );
        }
        if self.similarity_top_k == 0 {
            bail!("similarity_top_k must be positive");
        }
        Ok(())
    }
}
