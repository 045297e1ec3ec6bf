use thiserror::Error;

/// Errors raised by ingestion and query components
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing credential or inconsistent index / model settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ingestion path does not exist
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The embedding model could not be loaded
    #[error("Failed to initialize embedding model {model}: {message}")]
    ModelInit { model: String, message: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Transport or API failure from the chat-completion service
    #[error("Generation error: {0}")]
    Generation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
