// news-classifier/crates/news-classifier/src/error.rs
//! Error taxonomy for the classification core.
//!
//! Every failure leaving the registry, the runtimes or the inference engine is
//! one of four kinds. The HTTP layer maps kinds to status codes; the core never
//! retries or swallows an error.

/// Result type alias for classification operations
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Unified error type for the classification core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    /// Malformed or missing model configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lookup of a model name that was never registered
    #[error("Model '{0}' not found in registry")]
    NotFound(String),

    /// Artifact loading failed during first use; the bundle stays unloaded
    #[error("Failed to load model '{model}': {reason}")]
    Load { model: String, reason: String },

    /// Tokenization or forward pass failed for a single call
    #[error("Inference error: {0}")]
    Inference(String),
}

/// Coarse classification of a [`ClassifierError`], used by the boundary layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    NotFound,
    Load,
    Inference,
}

impl ClassifierError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn load(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifierError::Config(_) => ErrorKind::Config,
            ClassifierError::NotFound(_) => ErrorKind::NotFound,
            ClassifierError::Load { .. } => ErrorKind::Load,
            ClassifierError::Inference(_) => ErrorKind::Inference,
        }
    }
}
