//! Image search crawling
//!
//! The ingestion pipeline only depends on [`ImageCrawler`]. The shipped
//! implementation, [`NaverImageCrawler`], scrapes Naver image search result
//! pages. Failed crawls are not retried; the caller logs and skips the
//! keyword.

pub mod naver;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::error::{ErrorCategory, QuizsetErrorTrait};

pub use naver::NaverImageCrawler;

/// Errors that can occur while crawling image search results
#[derive(Error, Debug)]
pub enum CrawlError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Search engine throttled us (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Non-success status from the search engine
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Search URL could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl QuizsetErrorTrait for CrawlError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimit | Self::Timeout => true,
            Self::ServerError(status) => *status >= 500,
            Self::InvalidUrl(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

/// Finds image URLs for a search keyword
#[async_trait]
pub trait ImageCrawler: Send + Sync {
    /// Collect distinct image URLs for `keyword`, trying to reach
    /// `minimum_images`. Returning fewer is not an error: a failed request
    /// after the first page ends the crawl with what was already collected.
    async fn crawl(&self, keyword: &str, minimum_images: usize) -> Result<Vec<String>, CrawlError>;
}

/// Drop repeated URLs, keeping first-seen order
pub fn dedupe_urls<I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
