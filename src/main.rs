use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use medical_rag::chunking::Chunker;
use medical_rag::config::{IngestConfig, ServiceConfig};
use medical_rag::database::{IndexWriter, QdrantIndex};
use medical_rag::document::DocumentLoader;
use medical_rag::embeddings::{EmbedderConfig, FastEmbedder};
use medical_rag::groq::GroqClient;
use medical_rag::rag::{Ingestor, QueryPipeline};
use medical_rag::timing::timed;
use medical_rag::{logging, server};

/// Medical question answering over your own documents, backed by Qdrant and Groq
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, chunk and embed the documents folder into the vector index
    Ingest {
        /// Folder containing PDF or text documents
        #[arg(long, default_value = "Data/")]
        data_dir: PathBuf,
    },
    /// Start the chat web service
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    logging::init();

    let args = Args::parse();
    let outcome = match args.command {
        Command::Ingest { data_dir } => ingest(data_dir).await,
        Command::Serve { host, port } => serve(&host, port).await,
    };

    if let Err(e) = &outcome {
        error!("Fatal: {:#}", e);
    }
    outcome
}

/// The model load is blocking (and may download weights), so keep it off the
/// async workers
async fn load_embedder(config: EmbedderConfig) -> Result<Arc<FastEmbedder>> {
    let embedder = timed("load_embeddings_model", async move {
        tokio::task::spawn_blocking(move || FastEmbedder::load(&config))
            .await
            .context("Embedding model loader panicked")?
            .map_err(anyhow::Error::from)
    })
    .await?;
    Ok(Arc::new(embedder))
}

async fn ingest(data_dir: PathBuf) -> Result<()> {
    info!("{}", "=".repeat(60));
    info!("MEDICAL CHATBOT - VECTOR STORE CREATION");
    info!("{}", "=".repeat(60));

    let config = IngestConfig::from_env().context("Invalid configuration")?;
    let embedder = load_embedder(config.embedder).await?;
    let index = QdrantIndex::connect(&config.qdrant).context("Failed to initialize Qdrant client")?;

    let ingestor = Ingestor::new(
        DocumentLoader::new(),
        Chunker::default(),
        embedder,
        IndexWriter::new(Arc::new(index), config.qdrant.index.clone()),
    );

    let report = timed("create_vector_store", ingestor.run(&data_dir))
        .await
        .context("Vector store creation failed")?;

    info!(
        "Vector store creation completed: {} pages, {} chunks, {} indexed",
        report.documents, report.chunks, report.indexed
    );
    info!("The medical chatbot is ready to use.");
    Ok(())
}

async fn serve(host: &str, port: u16) -> Result<()> {
    info!("Initializing Medical Chatbot application");

    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    info!("API keys retrieved successfully");

    let embedder = load_embedder(config.embedder).await?;
    let index = QdrantIndex::connect(&config.qdrant).context("Failed to initialize Qdrant client")?;
    info!("Initializing Groq LLM with model: {}", config.groq.model);
    let generator = GroqClient::new(config.groq);

    let pipeline = QueryPipeline::connect(
        embedder,
        Arc::new(index),
        Arc::new(generator),
        &config.qdrant.index,
    )
    .await
    .context("Failed to initialize application components")?;

    let bind_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, server::router(Arc::new(pipeline)))
        .await
        .context("Server error")?;

    Ok(())
}
