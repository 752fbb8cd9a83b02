//! CLI error types and conversions

use crate::ingest::IngestError;
use crate::registry::RegistryError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Ingestion error
    #[error("ingestion error: {0}")]
    IngestError(#[from] IngestError),

    /// Registry error
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// Output serialization error
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Background run task failed
    #[error("run task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
