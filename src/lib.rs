pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod groq;
pub mod logging;
pub mod prompt;
pub mod rag;
pub mod server;
pub mod timing;
