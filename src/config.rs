use crate::database::QdrantConfig;
use crate::embeddings::EmbedderConfig;
use crate::error::{RagError, Result};
use crate::groq::GroqConfig;
use std::env;

/// Read a variable that must be present and non-blank
pub(crate) fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    optional(lookup, key).ok_or_else(|| {
        RagError::Config(format!("{} not found in environment variables", key))
    })
}

/// Read a variable, treating blank values as unset
pub(crate) fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Everything the chat service needs at startup
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub qdrant: QdrantConfig,
    pub groq: GroqConfig,
    pub embedder: EmbedderConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Both credentials are checked before anything expensive is loaded
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(ServiceConfig {
            qdrant: QdrantConfig::from_lookup(&lookup)?,
            groq: GroqConfig::from_lookup(&lookup)?,
            embedder: EmbedderConfig::from_lookup(&lookup),
        })
    }
}

/// Everything the ingestion command needs
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub qdrant: QdrantConfig,
    pub embedder: EmbedderConfig,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(IngestConfig {
            qdrant: QdrantConfig::from_lookup(&lookup)?,
            embedder: EmbedderConfig::from_lookup(&lookup),
        })
    }
}
