use thiserror::Error;

#[derive(Error, Debug)]
pub enum QtrixError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt value at key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QtrixError {
    pub fn validation(msg: impl Into<String>) -> Self {
        QtrixError::Validation(msg.into())
    }

    pub fn unavailable(msg: impl std::fmt::Display) -> Self {
        QtrixError::StoreUnavailable(msg.to_string())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, QtrixError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, QtrixError>;
