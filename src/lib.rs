//! quizset - Image-set quiz question pipeline
//!
//! Crawls images per keyword, groups each category's images into small
//! image sets, has a vision model write questions about every set, and hands
//! each question bundle out to exactly one requester.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`storage`] - Store trait with SQLite and in-memory implementations
//! - [`crawler`] - Image search crawling with rate limiting
//! - [`ingest`] - Keyword ingestion into the image pool
//! - [`partition`] - Random partition of a category into image sets
//! - [`llm`] - Question generation through a vision chat model
//! - [`generation`] - Batch orchestration over a bounded worker pool
//! - [`allocation`] - Exclusive hand-out of question bundles
//! - [`server`] - HTTP API, auth and preview page
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use quizset::allocation::AllocationService;
//! use quizset::models::{ImageCount, Requester};
//! use quizset::random::SharedRng;
//! use quizset::storage::create_sqlite_store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = create_sqlite_store("data/quizset.db")?;
//!     let service = AllocationService::new(store, SharedRng::from_entropy());
//!     let allocation = service.allocate(ImageCount::Any, Requester::new("demo")).await?;
//!     println!("{allocation:?}");
//!     Ok(())
//! }
//! ```

pub mod allocation;
pub mod config;
pub mod crawler;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod partition;
pub mod random;
pub mod server;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::allocation::AllocationService;
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, QuizsetErrorTrait, Result};
    pub use crate::generation::{BatchReport, GenerationOrchestrator};
    pub use crate::models::{Allocation, ImageCount, QuestionView, Requester};
    pub use crate::random::SharedRng;
    pub use crate::storage::{QuizStore, SharedQuizStore};
}

// Direct re-exports for convenience
pub use models::{Allocation, ImageCount, QuestionView};
