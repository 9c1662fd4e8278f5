use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("ingest of {filename} failed: {source}")]
    Ingest {
        filename: String,
        #[source]
        source: Box<RagError>,
    },

    #[error("operation exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("store error ({backend}): {message}")]
    Store { backend: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn store(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn ingest(filename: impl Into<String>, source: RagError) -> Self {
        Self::Ingest {
            filename: filename.into(),
            source: Box::new(source),
        }
    }

    /// True for failures of the remote embedding or chat provider.
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
