pub mod pipeline;
pub mod serve;

use anyhow::{Context, Result};
use std::sync::Arc;

use quizset::config::Config;
use quizset::crawler::{ImageCrawler, NaverImageCrawler};
use quizset::llm::{OpenAiQuestionGenerator, QuestionGenerator};
use quizset::storage::{create_sqlite_store, SharedQuizStore};

// Re-export command functions for convenience
pub use pipeline::{allocate, ensure_supply, generate, ingest, partition, stats};
pub use serve::serve;

fn open_store(config: &Config) -> Result<SharedQuizStore> {
    let path = &config.database.sqlite_path;
    create_sqlite_store(path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn build_crawler(config: &Config) -> Result<Arc<dyn ImageCrawler>> {
    let crawler = NaverImageCrawler::new(&config.crawler).context("Failed to create image crawler")?;
    Ok(Arc::new(crawler))
}

fn build_generator(config: &Config) -> Result<Arc<dyn QuestionGenerator>> {
    let generator = OpenAiQuestionGenerator::new(config.llm.clone())
        .context("Failed to create question generator")?;
    Ok(Arc::new(generator))
}

fn init_metrics() {
    if let Err(e) = quizset::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics, continuing without them");
    }
}
