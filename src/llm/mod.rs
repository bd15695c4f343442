//! Question generation through a multimodal chat model
//!
//! The orchestrator only sees the [`QuestionGenerator`] trait. The shipped
//! implementation, [`OpenAiQuestionGenerator`], talks to an OpenAI or Azure
//! OpenAI chat-completions endpoint with image inputs and structured output.

pub mod openai;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorCategory, QuizsetErrorTrait};

pub use openai::OpenAiQuestionGenerator;
pub use prompt::PromptBuilder;

/// Questions produced for one image set, with what they cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestions {
    pub questions: Vec<String>,
    pub total_cost: f64,
}

/// Errors raised by question generators
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the API
    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    /// The model declined to answer
    #[error("Model refused the request: {0}")]
    Refused(String),

    /// The response carried no content
    #[error("Empty response from model")]
    EmptyResponse,

    /// The content could not be turned into questions
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    /// Called without any image URL
    #[error("No image URLs supplied")]
    NoImages,

    /// The call exceeded its deadline
    #[error("Question generation timed out")]
    Timeout,

    /// The call was cancelled before completion
    #[error("Question generation cancelled")]
    Cancelled,

    /// Prompt template could not be loaded or rendered
    #[error("Prompt template error: {0}")]
    Template(String),

    /// Client could not be built from its configuration
    #[error("Generator configuration error: {0}")]
    Config(String),
}

impl QuizsetErrorTrait for GenerationError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyResponse | Self::Timeout => true,
            Self::Refused(_)
            | Self::MalformedResponse(_)
            | Self::NoImages
            | Self::Cancelled
            | Self::Template(_)
            | Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Template(_) | Self::Config(_) => ErrorCategory::Config,
            _ => ErrorCategory::Llm,
        }
    }
}

/// Generates quiz questions about a group of images
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Produce questions for the images at `image_urls`, in the given order
    async fn generate(&self, image_urls: &[String]) -> Result<GeneratedQuestions, GenerationError>;
}
