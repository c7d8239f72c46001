use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo-instruct";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Number of texts sent per embeddings request
const EMBED_BATCH_SIZE: usize = 10;

/// Configuration for the OpenAI API
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_base: String,
    pub completion_model: String,
    pub embedding_model: String,
}

impl OpenAiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        if api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("OPENAI_API_KEY is empty"));
        }

        let api_base = env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let completion_model = env::var("OPENAI_COMPLETION_MODEL")
            .unwrap_or_else(|_| DEFAULT_COMPLETION_MODEL.to_string());
        let embedding_model = env::var("OPENAI_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string());

        Ok(OpenAiConfig {
            api_key,
            api_base,
            completion_model,
            embedding_model,
        })
    }
}

/// A language model that turns a prompt into text
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Turns texts into vectors with a named embedding model
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    /// Switch models, e.g. to the one an existing index was built with
    fn set_model(&mut self, model: &str);

    /// One embedding per text, in input order
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>>;
}

/// Client for interacting with the OpenAI API
#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
    temperature: f32,
    max_tokens: usize,
}

impl OpenAiClient {
    /// Create a new OpenAI client answering with the given sampling settings
    pub fn new(config: OpenAiConfig, temperature: f32, max_tokens: usize) -> Self {
        let client = reqwest::Client::new();
        OpenAiClient {
            config,
            client,
            temperature,
            max_tokens,
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Generate embeddings for many texts, preserving their order
    pub async fn get_embeddings<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let input: Vec<&str> = batch.iter().map(|t| t.as_ref()).collect();
            let request = EmbeddingRequest {
                model: &self.config.embedding_model,
                input: &input,
            };

            let url = format!("{}/embeddings", self.config.api_base);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await
                .context("Embeddings request failed")?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(anyhow::anyhow!(
                    "API request failed: {} {}",
                    status,
                    error_text
                ));
            }

            let response_data: EmbeddingResponse = response.json().await?;
            embeddings.extend(order_embeddings(response_data, batch.len())?);
        }

        debug!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }

    /// Complete a prompt with the configured completion model
    pub async fn generate_text(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.config.completion_model,
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/completions", self.config.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("Completion request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed: {} {}",
                status,
                error_text
            ));
        }

        let response_data: CompletionResponse = response.json().await?;

        response_data
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| anyhow::anyhow!("No response generated"))
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate_text(prompt).await
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn model(&self) -> &str {
        &self.config.embedding_model
    }

    fn set_model(&mut self, model: &str) {
        self.config.embedding_model = model.to_string();
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        self.get_embeddings(texts).await
    }
}

/// Put embeddings back in request order.
/// Every index in `0..expected` must appear exactly once.
fn order_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Embedding>> {
    if response.data.len() != expected {
        return Err(anyhow::anyhow!(
            "Expected {} embeddings, got {}",
            expected,
            response.data.len()
        ));
    }

    let mut slots: Vec<Option<Embedding>> = vec![None; expected];
    for d in response.data {
        let slot = slots.get_mut(d.index).ok_or_else(|| {
            anyhow::anyhow!("Embedding index {} out of range 0..{}", d.index, expected)
        })?;
        if slot.is_some() {
            return Err(anyhow::anyhow!("Duplicate embedding index {}", d.index));
        }
        *slot = Some(Embedding {
            values: d.embedding,
        });
    }

    // Count matches and no index repeats, so every slot is filled
    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| anyhow::anyhow!("Missing embedding")))
        .collect()
}

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    text: String,
}
