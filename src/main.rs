use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use docs_rag::config::ServiceSettings;
use docs_rag::database::{QdrantClient, QdrantConfig};
use docs_rag::openai::{OpenAiClient, OpenAiConfig};
use docs_rag::rag::RagEngine;
use docs_rag::web::{self, AppState, DEFAULT_HOST, DEFAULT_PORT};

/// Answer questions about a folder of documents through a small web form
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Build a new index from the documents directory instead of loading the persisted one
    #[arg(long)]
    build: bool,

    /// Directory with the documents to index (text and PDF)
    #[arg(long, default_value = "docs")]
    docs: PathBuf,

    /// Directory where the index manifest is persisted
    #[arg(long, default_value = "storage")]
    storage: PathBuf,

    /// Also index documents in subdirectories
    #[arg(long)]
    recursive: bool,

    /// Address to serve the web form on
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to serve the web form on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = ServiceSettings::default();

    // Load configuration from environment
    let openai_config = OpenAiConfig::from_env().context("Missing OpenAI configuration")?;
    let qdrant_config = QdrantConfig::from_env().context("Missing Qdrant configuration")?;

    let openai = OpenAiClient::new(openai_config, settings.temperature, settings.num_output);
    let qdrant = QdrantClient::new(qdrant_config).context("Failed to initialize Qdrant client")?;

    let engine = if args.build {
        info!("Building index from {}", args.docs.display());
        RagEngine::build_index(
            &settings,
            openai.clone(),
            qdrant,
            openai,
            &args.docs,
            &args.storage,
            args.recursive,
        )
        .await
        .context("Failed to build index")?
    } else {
        info!("Loading index from {}", args.storage.display());
        RagEngine::load_index(&settings, openai.clone(), qdrant, openai, &args.storage)
            .await
            .context("Failed to load index")?
    };

    let state = AppState {
        engine: Arc::new(engine),
    };

    web::serve(state, &args.host, args.port).await
}
