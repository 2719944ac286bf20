use thiserror::Error;

use crate::recovery::ErrorType;

#[derive(Debug, Error)]
pub enum RpaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid work item {id}: {reason}")]
    InvalidWorkItem { id: String, reason: String },

    #[error("Desktop driver error: {0}")]
    Desktop(String),

    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, RpaError>;

impl From<&RpaError> for ErrorType {
    fn from(err: &RpaError) -> Self {
        match err {
            RpaError::Config(_) | RpaError::Toml(_) => ErrorType::ConfigurationError,
            RpaError::InvalidWorkItem { .. } | RpaError::Json(_) => ErrorType::DataProcessing,
            RpaError::Desktop(_) => ErrorType::SystemError,
            RpaError::Timeout { .. } => ErrorType::TimeoutError,
            RpaError::Io(_) | RpaError::Image(_) => ErrorType::FileOperation,
        }
    }
}
