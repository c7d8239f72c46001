use crate::chunking::split_into_chunks;
use crate::config::ServiceSettings;
use crate::database::{get_collection_name, RetrievedChunk, VectorStore};
use crate::document::load_directory;
use crate::index::{DocumentEntry, IndexManifest};
use crate::openai::{Embedder, LanguageModel};
use crate::prompt::PromptHelper;
use crate::synthesis::{ResponseSynthesizer, EMPTY_RESPONSE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::Path;

/// Characters of each source shown under an answer
pub const SOURCE_TEXT_LENGTH: usize = 100;

/// An answer together with the chunks it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub response: String,
    pub source_nodes: Vec<RetrievedChunk>,
}

impl QueryResponse {
    /// One `> Source (Doc id: ...)` line per source, separated by blank lines
    pub fn get_formatted_sources(&self, length: usize) -> String {
        self.source_nodes
            .iter()
            .map(|node| {
                format!(
                    "> Source (Doc id: {}): {}",
                    node.chunk.document_id,
                    truncate_text(&node.chunk.text, length)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// At most `length` characters of `text`, ending in "..." when cut
fn truncate_text(text: &str, length: usize) -> String {
    if text.chars().count() <= length {
        return text.to_string();
    }
    if length < 3 {
        return text.chars().take(length).collect();
    }
    let kept: String = text.chars().take(length - 3).collect();
    format!("{}...", kept)
}

/// Anything that can answer a free-text query
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, query: &str) -> Result<QueryResponse>;
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<E, S, M> {
    embedder: E,
    store: S,
    synthesizer: ResponseSynthesizer<M>,
    collection: String,
    similarity_top_k: u64,
}

impl<E: Embedder, S: VectorStore, M: LanguageModel> RagEngine<E, S, M> {
    /// Index every document in `docs_dir` from scratch and persist the manifest
    pub async fn build_index(
        settings: &ServiceSettings,
        embedder: E,
        store: S,
        model: M,
        docs_dir: &Path,
        storage_dir: &Path,
        recursive: bool,
    ) -> Result<Self> {
        settings.validate()?;
        let chunking = settings.chunking();

        let documents = load_directory(docs_dir, recursive)?;

        let mut chunks = Vec::new();
        let mut entries = Vec::new();
        for document in &documents {
            let document_chunks =
                split_into_chunks(&document.content, &document.document_id, &chunking);
            if document_chunks.is_empty() {
                warn!("{} has no text to index", document.document_id);
            }
            entries.push(DocumentEntry {
                document_id: document.document_id.clone(),
                path: document.path.clone(),
                mime_type: document.mime_type.clone(),
                chunk_count: document_chunks.len(),
            });
            chunks.extend(document_chunks);
        }
        info!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );

        if chunks.is_empty() {
            return Err(anyhow::anyhow!(
                "Documents in {} contain no text to index",
                docs_dir.display()
            ));
        }

        info!("Generating embeddings for {} chunks...", chunks.len());
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = embedder
            .embed(&texts)
            .await
            .context("Failed to embed document chunks")?;
        let vector_size = embeddings
            .first()
            .map(|e| e.values.len() as u64)
            .filter(|size| *size > 0)
            .context("Embedding API returned empty vectors")?;

        let collection = collection_name_for(docs_dir);
        if store.collection_exists(&collection).await? {
            info!("Replacing existing collection: {}", collection);
            store.delete_collection(&collection).await?;
        }
        store.create_collection(&collection, vector_size).await?;
        store.store_chunks(chunks, embeddings, &collection).await?;

        let manifest = IndexManifest::new(
            collection,
            embedder.model().to_string(),
            vector_size,
            chunking,
            entries,
        );
        manifest.save(storage_dir)?;

        Ok(Self::from_parts(settings, embedder, store, model, manifest))
    }

    /// Reopen an index persisted by [`RagEngine::build_index`]
    pub async fn load_index(
        settings: &ServiceSettings,
        mut embedder: E,
        store: S,
        model: M,
        storage_dir: &Path,
    ) -> Result<Self> {
        settings.validate()?;
        let manifest = IndexManifest::load(storage_dir)?;

        verify_collection(&store, &manifest, storage_dir).await?;

        if embedder.model() != manifest.embedding_model {
            warn!(
                "Index was built with {}, ignoring configured embedding model {}",
                manifest.embedding_model,
                embedder.model()
            );
            embedder.set_model(&manifest.embedding_model);
        }

        info!(
            "Loaded index {} with {} documents and {} chunks",
            manifest.collection,
            manifest.documents.len(),
            manifest.chunk_count()
        );

        Ok(Self::from_parts(settings, embedder, store, model, manifest))
    }

    fn from_parts(
        settings: &ServiceSettings,
        embedder: E,
        store: S,
        model: M,
        manifest: IndexManifest,
    ) -> Self {
        let prompt_helper = PromptHelper::new(
            settings.max_input_size,
            settings.num_output,
            settings.max_chunk_overlap,
        );

        RagEngine {
            embedder,
            store,
            synthesizer: ResponseSynthesizer::new(model, prompt_helper),
            collection: manifest.collection,
            similarity_top_k: settings.similarity_top_k,
        }
    }
}

/// The collection must hold exactly the chunks the manifest lists, with
/// vectors of the recorded size. An interrupted rebuild leaves it short.
async fn verify_collection<S: VectorStore>(
    store: &S,
    manifest: &IndexManifest,
    storage_dir: &Path,
) -> Result<()> {
    let stats = store
        .collection_stats(&manifest.collection)
        .await?
        .with_context(|| {
            format!(
                "Collection {} from {} is missing in Qdrant; rebuild with --build",
                manifest.collection,
                IndexManifest::path_in(storage_dir).display()
            )
        })?;

    let expected = manifest.chunk_count() as u64;
    if stats.points_count != expected {
        return Err(anyhow::anyhow!(
            "Collection {} holds {} points but the index lists {} chunks; rebuild with --build",
            manifest.collection,
            stats.points_count,
            expected
        ));
    }

    if let Some(size) = stats.vector_size {
        if size != manifest.vector_size {
            return Err(anyhow::anyhow!(
                "Collection {} stores {}-dimensional vectors but the index expects {}; rebuild with --build",
                manifest.collection,
                size,
                manifest.vector_size
            ));
        }
    }

    Ok(())
}

#[async_trait]
impl<E: Embedder, S: VectorStore, M: LanguageModel> QueryEngine for RagEngine<E, S, M> {
    async fn query(&self, query: &str) -> Result<QueryResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(QueryResponse {
                response: EMPTY_RESPONSE.to_string(),
                source_nodes: Vec::new(),
            });
        }

        let query_embedding = self
            .embedder
            .embed(&[query])
            .await?
            .into_iter()
            .next()
            .context("No embedding returned for the query")?;
        let chunks = self
            .store
            .search(query_embedding, &self.collection, self.similarity_top_k)
            .await?;

        let response = self.synthesizer.synthesize(query, &chunks).await?;

        Ok(QueryResponse {
            response,
            source_nodes: chunks,
        })
    }
}

/// Collection name derived from the documents directory
fn collection_name_for(docs_dir: &Path) -> String {
    let name = docs_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("docs");
    get_collection_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::TextChunk;
    use crate::database::CollectionStats;
    use crate::openai::Embedding;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const VECTOR_SIZE: usize = 3;

    /// Records which model embedded which texts
    #[derive(Clone)]
    struct FakeEmbedder {
        model: String,
        calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    impl FakeEmbedder {
        fn new(model: &str) -> Self {
            FakeEmbedder {
                model: model.to_string(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model(&self) -> &str {
            &self.model
        }

        fn set_model(&mut self, model: &str) {
            self.model = model.to_string();
        }

        async fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            self.calls.lock().unwrap().push((
                self.model.clone(),
                texts.iter().map(|t| t.to_string()).collect(),
            ));
            Ok(texts
                .iter()
                .map(|t| Embedding {
                    values: vec![t.len() as f32, 1.0, 0.0],
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct StoreState {
        collections: HashMap<String, (u64, Vec<TextChunk>)>,
        search_limits: Vec<u64>,
        /// Fail `store_chunks` after keeping this many points
        fail_after: Option<usize>,
    }

    /// In-memory collections shared between clones
    #[derive(Clone, Default)]
    struct FakeStore {
        state: Arc<Mutex<StoreState>>,
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn collection_stats(&self, name: &str) -> Result<Option<CollectionStats>> {
            let state = self.state.lock().unwrap();
            Ok(state.collections.get(name).map(|(size, points)| CollectionStats {
                points_count: points.len() as u64,
                vector_size: Some(*size),
            }))
        }

        async fn create_collection(&self, name: &str, vector_size: u64) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state
                .collections
                .insert(name.to_string(), (vector_size, Vec::new()));
            Ok(())
        }

        async fn delete_collection(&self, name: &str) -> Result<()> {
            self.state.lock().unwrap().collections.remove(name);
            Ok(())
        }

        async fn store_chunks(
            &self,
            chunks: Vec<TextChunk>,
            _embeddings: Vec<Embedding>,
            name: &str,
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            let fail_after = state.fail_after;
            let (_, points) = state
                .collections
                .get_mut(name)
                .ok_or_else(|| anyhow::anyhow!("no collection {}", name))?;
            match fail_after {
                Some(n) if n < chunks.len() => {
                    points.extend(chunks.into_iter().take(n));
                    Err(anyhow::anyhow!("connection reset"))
                }
                _ => {
                    points.extend(chunks);
                    Ok(())
                }
            }
        }

        async fn search(
            &self,
            _embedding: Embedding,
            name: &str,
            limit: u64,
        ) -> Result<Vec<RetrievedChunk>> {
            let mut state = self.state.lock().unwrap();
            state.search_limits.push(limit);
            let (_, points) = state
                .collections
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("no collection {}", name))?;
            Ok(points
                .iter()
                .take(limit as usize)
                .map(|chunk| RetrievedChunk {
                    chunk: chunk.clone(),
                    score: 0.9,
                })
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct FakeModel {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LanguageModel for FakeModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("Paris.".to_string())
        }
    }

    /// A documents directory with three one-chunk files and an empty storage directory
    fn workspace() -> (TempDir, TempDir) {
        let docs = TempDir::new().unwrap();
        fs::write(docs.path().join("a.txt"), "The capital of France is Paris.").unwrap();
        fs::write(docs.path().join("b.txt"), "The Seine flows through Paris.").unwrap();
        fs::write(docs.path().join("c.txt"), "Lyon is in France.").unwrap();
        (docs, TempDir::new().unwrap())
    }

    async fn build(
        docs: &TempDir,
        storage: &TempDir,
        store: &FakeStore,
    ) -> Result<RagEngine<FakeEmbedder, FakeStore, FakeModel>> {
        RagEngine::build_index(
            &ServiceSettings::default(),
            FakeEmbedder::new("embed-a"),
            store.clone(),
            FakeModel::default(),
            docs.path(),
            storage.path(),
            false,
        )
        .await
    }

    async fn load(
        storage: &TempDir,
        embedder: FakeEmbedder,
        store: &FakeStore,
        model: FakeModel,
    ) -> Result<RagEngine<FakeEmbedder, FakeStore, FakeModel>> {
        RagEngine::load_index(
            &ServiceSettings::default(),
            embedder,
            store.clone(),
            model,
            storage.path(),
        )
        .await
    }

    fn source(document_id: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: TextChunk {
                text: text.to_string(),
                token_count: 0,
                document_id: document_id.to_string(),
                start_position: 0,
            },
            score: 0.5,
        }
    }

    #[test]
    fn test_formatted_sources() {
        let response = QueryResponse {
            response: "Answer".to_string(),
            source_nodes: vec![
                source("a.txt", "short text"),
                source("b.txt", &"x".repeat(150)),
            ],
        };

        let formatted = response.get_formatted_sources(SOURCE_TEXT_LENGTH);
        let expected = format!(
            "> Source (Doc id: a.txt): short text\n\n> Source (Doc id: b.txt): {}...",
            "x".repeat(97)
        );
        assert_eq!(formatted, expected);
    }

    #[test]
    fn test_formatted_sources_empty() {
        let response = QueryResponse {
            response: "Answer".to_string(),
            source_nodes: Vec::new(),
        };
        assert_eq!(response.get_formatted_sources(100), "");
    }

    #[test]
    fn test_truncate_text_counts_characters() {
        assert_eq!(truncate_text("héllo", 5), "héllo");
        assert_eq!(truncate_text("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_truncate_text_never_exceeds_length() {
        assert_eq!(truncate_text("hello", 0), "");
        assert_eq!(truncate_text("hello", 2), "he");
        assert_eq!(truncate_text("hello", 3), "...");
        for length in 0..8 {
            assert!(truncate_text("héllo wörld", length).chars().count() <= length);
        }
    }

    #[test]
    fn test_collection_name_for_directory() {
        assert_eq!(collection_name_for(Path::new("docs")), "rag_docs");
        assert_eq!(
            collection_name_for(Path::new("/data/Team Wiki")),
            "rag_team_wiki"
        );
        assert_eq!(collection_name_for(Path::new("/")), "rag_docs");
    }

    #[tokio::test]
    async fn test_build_index_persists_manifest_matching_collection() {
        let (docs, storage) = workspace();
        let store = FakeStore::default();
        build(&docs, &storage, &store).await.unwrap();

        let manifest = IndexManifest::load(storage.path()).unwrap();
        assert_eq!(manifest.embedding_model, "embed-a");
        assert_eq!(manifest.vector_size, VECTOR_SIZE as u64);
        assert_eq!(manifest.documents.len(), 3);
        assert_eq!(manifest.documents[0].document_id, "a.txt");

        let stats = store
            .collection_stats(&manifest.collection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.points_count, manifest.chunk_count() as u64);
        assert_eq!(stats.vector_size, Some(VECTOR_SIZE as u64));
    }

    #[tokio::test]
    async fn test_query_passes_similarity_top_k_to_store() {
        let (docs, storage) = workspace();
        let store = FakeStore::default();
        let model = FakeModel::default();
        build(&docs, &storage, &store).await.unwrap();
        let engine = load(&storage, FakeEmbedder::new("embed-a"), &store, model.clone())
            .await
            .unwrap();

        let response = engine.query("  What is the capital of France?  ").await.unwrap();

        assert_eq!(store.state.lock().unwrap().search_limits, vec![2]);
        assert_eq!(response.source_nodes.len(), 2);
        assert_eq!(response.response, "Paris.");
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("What is the capital of France?"));
        assert!(prompts[0].contains("The capital of France is Paris."));
    }

    #[tokio::test]
    async fn test_blank_query_short_circuits() {
        let (docs, storage) = workspace();
        let store = FakeStore::default();
        let embedder = FakeEmbedder::new("embed-a");
        let model = FakeModel::default();
        build(&docs, &storage, &store).await.unwrap();
        let engine = load(&storage, embedder.clone(), &store, model.clone())
            .await
            .unwrap();

        for query in ["", "   \n\t"] {
            let response = engine.query(query).await.unwrap();
            assert_eq!(response.response, EMPTY_RESPONSE);
            assert!(response.source_nodes.is_empty());
        }

        assert!(embedder.calls.lock().unwrap().is_empty());
        assert!(store.state.lock().unwrap().search_limits.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_index_embeds_queries_with_indexed_model() {
        let (docs, storage) = workspace();
        let store = FakeStore::default();
        build(&docs, &storage, &store).await.unwrap();

        let embedder = FakeEmbedder::new("embed-b");
        let engine = load(&storage, embedder.clone(), &store, FakeModel::default())
            .await
            .unwrap();
        engine.query("Where is Lyon?").await.unwrap();

        let calls = embedder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "embed-a");
        assert_eq!(calls[0].1, vec!["Where is Lyon?".to_string()]);
    }

    #[tokio::test]
    async fn test_load_index_rejects_collection_left_by_failed_rebuild() {
        let (docs, storage) = workspace();
        let store = FakeStore::default();
        build(&docs, &storage, &store).await.unwrap();
        let manifest = IndexManifest::load(storage.path()).unwrap();

        store.state.lock().unwrap().fail_after = Some(1);
        assert!(build(&docs, &storage, &store).await.is_err());
        // The previous manifest survives, but its collection is now short
        assert_eq!(IndexManifest::load(storage.path()).unwrap(), manifest);

        let err = load(&storage, FakeEmbedder::new("embed-a"), &store, FakeModel::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("holds 1 points"));
        assert!(err.to_string().contains("--build"));
    }

    #[tokio::test]
    async fn test_load_index_rejects_vector_size_mismatch() {
        let (docs, storage) = workspace();
        let store = FakeStore::default();
        build(&docs, &storage, &store).await.unwrap();
        let manifest = IndexManifest::load(storage.path()).unwrap();

        store
            .state
            .lock()
            .unwrap()
            .collections
            .get_mut(&manifest.collection)
            .unwrap()
            .0 = 1536;

        let err = load(&storage, FakeEmbedder::new("embed-a"), &store, FakeModel::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("1536-dimensional"));
    }

    #[tokio::test]
    async fn test_load_index_rejects_missing_collection() {
        let (docs, storage) = workspace();
        let store = FakeStore::default();
        build(&docs, &storage, &store).await.unwrap();
        store.state.lock().unwrap().collections.clear();

        let err = load(&storage, FakeEmbedder::new("embed-a"), &store, FakeModel::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("is missing"));
    }
}
