use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Missing or corrupt model file, backend init failure or context
    /// allocation failure. The caller may retry the load.
    #[error("Failed to load model from '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Tokenization failed: {0}")]
    TokenizeFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Model not loaded")]
    NotLoaded,

    /// A generation is already in flight on this session.
    #[error("A generation is already in progress")]
    Busy,
}

impl SessionError {
    pub(crate) fn load(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
