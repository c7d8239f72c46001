use crate::chunking::TextChunk;
use crate::openai::Embedding;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use qdrant_client::qdrant::{vectors_config, CountPointsBuilder, UpsertPointsBuilder};
use qdrant_client::qdrant::{CreateCollectionBuilder, Distance, PointStruct, Value, VectorParams};
use qdrant_client::Qdrant;
use serde_json::json;
use std::collections::HashMap;
use std::env;

const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Points sent per upsert request
const UPSERT_BATCH_SIZE: usize = 256;

/// Configuration for Qdrant
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = env::var("QDRANT_URL").unwrap_or_else(|_| DEFAULT_QDRANT_URL.to_string());
        let api_key = env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty());

        Ok(QdrantConfig { url, api_key })
    }
}

/// A chunk returned from a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: TextChunk,
    /// Cosine similarity to the query
    pub score: f32,
}

/// Size of a stored collection, as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    pub points_count: u64,
    /// Dimensions of the collection's vectors, if it has a single unnamed vector
    pub vector_size: Option<u64>,
}

/// Where chunk vectors are stored and searched
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Stats for a collection, or `None` if it does not exist
    async fn collection_stats(&self, collection_name: &str) -> Result<Option<CollectionStats>>;

    async fn collection_exists(&self, collection_name: &str) -> Result<bool> {
        Ok(self.collection_stats(collection_name).await?.is_some())
    }

    async fn create_collection(&self, collection_name: &str, vector_size: u64) -> Result<()>;

    async fn delete_collection(&self, collection_name: &str) -> Result<()>;

    async fn store_chunks(
        &self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
        collection_name: &str,
    ) -> Result<()>;

    async fn search(
        &self,
        query_embedding: Embedding,
        collection_name: &str,
        limit: u64,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// Client for interacting with Qdrant
pub struct QdrantClient {
    client: Qdrant,
}

impl QdrantClient {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .with_context(|| format!("Failed to connect to Qdrant at {}", config.url))?;

        Ok(QdrantClient { client })
    }
}

#[async_trait]
impl VectorStore for QdrantClient {
    async fn collection_stats(&self, collection_name: &str) -> Result<Option<CollectionStats>> {
        let response = match self.client.collection_info(collection_name.to_string()).await {
            Ok(response) => response,
            Err(qdrant_client::QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                return Ok(None);
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to check collection existence: {}",
                    e
                ))
            }
        };

        let info = response
            .result
            .with_context(|| format!("Qdrant returned no info for {}", collection_name))?;

        let vector_size = info
            .config
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                vectors_config::Config::Params(params) => Some(params.size),
                _ => None,
            });

        // `points_count` in the collection info is approximate
        let points_count = self
            .client
            .count(CountPointsBuilder::new(collection_name).exact(true))
            .await
            .with_context(|| format!("Failed to count points in {}", collection_name))?
            .result
            .map(|r| r.count)
            .unwrap_or(0);

        Ok(Some(CollectionStats {
            points_count,
            vector_size,
        }))
    }

    /// Create a new collection for vectors of `vector_size` dimensions
    async fn create_collection(&self, collection_name: &str, vector_size: u64) -> Result<()> {
        let create_collection = CreateCollectionBuilder::new(collection_name).vectors_config(
            VectorParams {
                size: vector_size,
                distance: Distance::Cosine.into(),
                ..Default::default()
            },
        );

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", collection_name))?;

        info!(
            "Created collection {} ({} dimensions)",
            collection_name, vector_size
        );
        Ok(())
    }

    /// Delete a collection
    async fn delete_collection(&self, collection_name: &str) -> Result<()> {
        self.client
            .delete_collection(collection_name.to_string())
            .await
            .with_context(|| format!("Failed to delete collection {}", collection_name))?;

        Ok(())
    }

    /// Store chunks in the collection, numbering points from zero
    async fn store_chunks(
        &self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
        collection_name: &str,
    ) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(anyhow::anyhow!(
                "Got {} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            ));
        }

        let points = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(idx, (chunk, embedding))| {
                let payload: HashMap<String, Value> =
                    serde_json::from_value(chunk_payload(&chunk, idx))
                        .context("Failed to build point payload")?;

                Ok(PointStruct::new(idx as u64, embedding.values, payload))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        let total = points.len();
        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            let upsert_request =
                UpsertPointsBuilder::new(collection_name, batch.to_vec()).wait(true);

            self.client
                .upsert_points(upsert_request)
                .await
                .with_context(|| {
                    format!("Failed to upsert points in collection {}", collection_name)
                })?;
        }

        info!("Stored {} chunks in {}", total, collection_name);
        Ok(())
    }

    /// Search for relevant chunks
    async fn search(
        &self,
        query_embedding: Embedding,
        collection_name: &str,
        limit: u64,
    ) -> Result<Vec<RetrievedChunk>> {
        use qdrant_client::qdrant::{with_payload_selector, SearchPoints, WithPayloadSelector};

        let search_request = SearchPoints {
            collection_name: collection_name.to_string(),
            vector: query_embedding.values,
            limit,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(with_payload_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", collection_name))?;

        let chunks: Vec<RetrievedChunk> = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let payload = scored_point.payload;
                let text = payload.get("text")?.as_str()?;
                let document_id = payload
                    .get("document_id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let start_position = payload
                    .get("start_position")
                    .and_then(|v| v.as_integer())
                    .map(|v| v as usize)
                    .unwrap_or(0);

                Some(RetrievedChunk {
                    chunk: TextChunk {
                        text: text.to_string(),
                        token_count: crate::chunking::estimate_token_count(text),
                        document_id,
                        start_position,
                    },
                    score: scored_point.score,
                })
            })
            .collect();

        for hit in &chunks {
            debug!(
                "Retrieved {} @ {} (score {:.4})",
                hit.chunk.document_id, hit.chunk.start_position, hit.score
            );
        }

        Ok(chunks)
    }
}

/// Payload stored alongside each point
fn chunk_payload(chunk: &TextChunk, chunk_index: usize) -> serde_json::Value {
    json!({
        "text": chunk.text,
        "document_id": chunk.document_id,
        "start_position": chunk.start_position,
        "chunk_index": chunk_index,
    })
}

/// Generate a collection name from an arbitrary name
pub fn get_collection_name(name: &str) -> String {
    // Replace non-alphanumeric characters with underscores and convert to lowercase
    let name = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase();

    format!("rag_{}", name)
}
