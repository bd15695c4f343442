//! Unified error handling for the quizset crate
//!
//! Each domain owns a specific error enum (store, crawler, generator). This
//! module folds them into a single [`Error`] so services and the HTTP layer
//! can classify failures uniformly.
//!
//! # Architecture
//!
//! - [`QuizsetErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors

use std::io;
use thiserror::Error;

pub use crate::crawler::CrawlError;
pub use crate::llm::GenerationError;
pub use crate::storage::StoreError;

/// Common trait for all quizset error types
pub trait QuizsetErrorTrait: std::error::Error {
    /// Check if this error is transient (a later attempt may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected input; surfaced to the caller as a client error
    Validation,
    /// Crawler and HTTP errors
    Network,
    /// Persistence errors
    Storage,
    /// Question generator errors
    Llm,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Llm => "llm",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the quizset crate
#[derive(Error, Debug)]
pub enum Error {
    /// Requested image count is outside `0..=3`
    #[error("image_count must be 0, 1, 2 or 3 (got {0})")]
    InvalidImageCount(i64),

    /// Other rejected input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Crawler errors
    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    /// Question generator errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl QuizsetErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidImageCount(_) | Self::Validation(_) => false,
            Self::Store(e) => e.is_recoverable(),
            Self::Crawl(e) => e.is_recoverable(),
            Self::Generation(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidImageCount(_) | Self::Validation(_) => ErrorCategory::Validation,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Crawl(_) => ErrorCategory::Network,
            Self::Generation(_) => ErrorCategory::Llm,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the error should be reported to HTTP callers as a 4xx
    pub fn is_client_error(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
