use crate::error::{RagError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Wrap raw values, checking them against the expected dimension
    pub fn with_dimension(values: Vec<f32>, dimension: usize) -> Result<Self> {
        if values.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: values.len(),
            });
        }
        Ok(Embedding { values })
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Turns text into fixed-size vectors. Loaded once per process and shared by
/// ingestion and query.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Size of every vector this embedder produces
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Embedding>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Configuration for the local embedding model
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedderConfig {
    pub model_name: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig {
            model_name: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

impl EmbedderConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let model_name = crate::config::optional(&lookup, "EMBEDDING_MODEL")
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
        EmbedderConfig { model_name }
    }
}

/// Map a Hugging Face model id onto the models fastembed ships, with the
/// dimension each one produces
fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    match name {
        "sentence-transformers/all-MiniLM-L6-v2" | "all-minilm-l6-v2" => {
            Some((EmbeddingModel::AllMiniLML6V2, 384))
        }
        "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => Some((EmbeddingModel::BGESmallENV15, 384)),
        "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => Some((EmbeddingModel::BGEBaseENV15, 768)),
        _ => None,
    }
}

/// Sentence-transformer embeddings computed in-process with fastembed
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Download (first run) and load the model, then check it with a test
    /// sentence
    pub fn load(config: &EmbedderConfig) -> Result<Self> {
        let model_name = config.model_name.clone();
        info!("Initializing embeddings model: {}", model_name);

        let init_error = |message: String| RagError::ModelInit {
            model: model_name.clone(),
            message,
        };

        let (model_id, dimension) = resolve_model(&model_name)
            .ok_or_else(|| init_error("unsupported embedding model".to_string()))?;

        let model = TextEmbedding::try_new(InitOptions::new(model_id))
            .map_err(|e| init_error(e.to_string()))?;

        let probe = model
            .embed(vec!["This is a test sentence."], None)
            .map_err(|e| init_error(e.to_string()))?;
        let probe_dimension = probe.first().map(Vec::len).unwrap_or(0);
        if probe_dimension != dimension {
            return Err(init_error(format!(
                "expected {}-dimensional output, model produced {}",
                dimension, probe_dimension
            )));
        }
        info!(
            "Embeddings model working correctly. Embedding dimension: {}",
            dimension
        );

        Ok(FastEmbedder {
            model: Arc::new(model),
            model_name,
            dimension,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Run inference on the blocking pool so the runtime threads stay free
    async fn run(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let model = Arc::clone(&self.model);
        let raw = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| RagError::Embedding(format!("embedding task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        raw.into_iter()
            .map(|values| Embedding::with_dimension(values, self.dimension))
            .collect()
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.run(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("model returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.run(texts.to_vec()).await?;
        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "model returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }
}
