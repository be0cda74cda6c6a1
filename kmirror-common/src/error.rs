// kmirror-common/src/error.rs
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum KmError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("API Error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Build Error for '{target}': {message}")]
    BuildError { target: String, message: String },

    #[error("Worker panicked: {0}")]
    WorkerPanic(String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl KmError {
    /// True for the "record or asset is absent" outcome, which callers often
    /// treat as an expected answer rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KmError::NotFound(_))
    }
}

impl From<std::io::Error> for KmError {
    fn from(err: std::io::Error) -> Self {
        KmError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for KmError {
    fn from(err: reqwest::Error) -> Self {
        KmError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for KmError {
    fn from(err: serde_json::Error) -> Self {
        KmError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for KmError {
    fn from(err: toml::de::Error) -> Self {
        KmError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, KmError>;
