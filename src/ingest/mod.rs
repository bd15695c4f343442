//! Keyword ingestion: crawl, grow the image pool, partition
//!
//! For a category and its keywords the search words are the category itself,
//! each keyword, and each keyword prefixed by the category. Every search
//! word becomes a keyword row of that category; its crawled URLs that the
//! pool has never seen are inserted and mapped to it. The category is then
//! partitioned into image sets.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::crawler::{dedupe_urls, ImageCrawler};
use crate::error::{Error, Result};
use crate::metrics;
use crate::partition::SetPartitioner;
use crate::storage::{run_blocking, SharedQuizStore};

/// Search words for a category, in crawl order and without repeats
pub fn search_words(category: &str, keywords: &[String]) -> Vec<String> {
    let category = category.trim();
    let keywords: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();

    let words = std::iter::once(category.to_string())
        .chain(keywords.iter().map(|k| k.to_string()))
        .chain(keywords.iter().map(|k| format!("{category} {k}")));
    dedupe_urls(words)
}

/// Summary of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub category: String,
    pub search_words: usize,
    /// Distinct URLs returned by the crawler across all search words
    pub crawled_urls: usize,
    /// URLs that were new to the pool
    pub new_images: usize,
    /// Search words whose crawl failed
    pub failed_words: Vec<String>,
    /// Image sets created by the follow-up partition
    pub image_sets: usize,
}

/// Crawls search words into the image pool and partitions the category
pub struct KeywordIngestor {
    store: SharedQuizStore,
    crawler: Arc<dyn ImageCrawler>,
    partitioner: SetPartitioner,
    minimum_images: usize,
    max_concurrent: usize,
}

struct WordOutcome {
    word: String,
    crawled: Option<usize>,
    inserted: usize,
}

impl KeywordIngestor {
    pub fn new(
        store: SharedQuizStore,
        crawler: Arc<dyn ImageCrawler>,
        partitioner: SetPartitioner,
        minimum_images: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            crawler,
            partitioner,
            minimum_images,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Crawl `category` and `keywords`, add new images, then partition
    ///
    /// A failed crawl is logged and the search word skipped. Store errors
    /// abort the run.
    pub async fn ingest(&self, category: &str, keywords: &[String]) -> Result<IngestReport> {
        let category = category.trim();
        if category.is_empty() {
            return Err(Error::validation("category must not be empty"));
        }

        let words = search_words(category, keywords);
        tracing::info!(category = %category, search_words = words.len(), "Starting keyword ingestion");

        let outcomes: Vec<Result<WordOutcome>> = stream::iter(words.iter().cloned())
            .map(|word| self.ingest_word(category, word))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = IngestReport {
            category: category.to_string(),
            search_words: words.len(),
            ..IngestReport::default()
        };
        for outcome in outcomes {
            let outcome = outcome?;
            match outcome.crawled {
                Some(crawled) => {
                    report.crawled_urls += crawled;
                    report.new_images += outcome.inserted;
                }
                None => report.failed_words.push(outcome.word),
            }
        }
        metrics::record_images_ingested(category, report.new_images);

        let sets = self.partitioner.partition(category).await?;
        report.image_sets = sets.len();

        tracing::info!(
            category = %category,
            crawled_urls = report.crawled_urls,
            new_images = report.new_images,
            failed = report.failed_words.len(),
            image_sets = report.image_sets,
            "Keyword ingestion complete"
        );
        Ok(report)
    }

    async fn ingest_word(&self, category: &str, word: String) -> Result<WordOutcome> {
        let keyword = {
            let (word, category) = (word.clone(), category.to_string());
            run_blocking(&self.store, move |s| s.upsert_keyword(&word, &category)).await?
        };

        let urls = match self.crawler.crawl(&word, self.minimum_images).await {
            Ok(urls) => dedupe_urls(urls),
            Err(e) => {
                tracing::warn!(keyword = %word, error = %e, "Crawl failed, skipping keyword");
                return Ok(WordOutcome {
                    word,
                    crawled: None,
                    inserted: 0,
                });
            }
        };

        let crawled = urls.len();
        let inserted = run_blocking(&self.store, move |s| s.insert_new_images(keyword.id, &urls))
            .await?
            .len();

        tracing::info!(keyword = %word, crawled, inserted, "Inserted new images for keyword");
        Ok(WordOutcome {
            word,
            crawled: Some(crawled),
            inserted,
        })
    }
}

/// Keyword seed file: `{"query": category, "1": [...], "2": [...], "3": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SeedFile {
    pub query: String,
    #[serde(rename = "1", default)]
    pub first: Vec<String>,
    #[serde(rename = "2", default)]
    pub second: Vec<String>,
    #[serde(rename = "3", default)]
    pub third: Vec<String>,
}

impl SeedFile {
    /// Read and parse a seed file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Category to ingest
    pub fn category(&self) -> &str {
        &self.query
    }

    /// All keyword groups, in group order
    pub fn keywords(&self) -> Vec<String> {
        self.first
            .iter()
            .chain(&self.second)
            .chain(&self.third)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::CrawlError;
    use crate::random::SharedRng;
    use crate::storage::create_memory_store;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MapCrawler(HashMap<String, Vec<String>>);

    #[async_trait]
    impl ImageCrawler for MapCrawler {
        async fn crawl(
            &self,
            keyword: &str,
            _minimum_images: usize,
        ) -> std::result::Result<Vec<String>, CrawlError> {
            self.0.get(keyword).cloned().ok_or(CrawlError::ServerError(503))
        }
    }

    fn ingestor(store: SharedQuizStore, pages: &[(&str, &[&str])]) -> KeywordIngestor {
        let crawler = MapCrawler(
            pages
                .iter()
                .map(|(k, urls)| (k.to_string(), urls.iter().map(|u| u.to_string()).collect()))
                .collect(),
        );
        let partitioner = SetPartitioner::new(store.clone(), SharedRng::seeded(8));
        KeywordIngestor::new(store, Arc::new(crawler), partitioner, 10, 2)
    }

    #[test]
    fn test_search_words() {
        let words = search_words("animal", &["cat".to_string(), " ".to_string(), "dog".to_string()]);
        assert_eq!(words, vec!["animal", "cat", "dog", "animal cat", "animal dog"]);
    }

    #[tokio::test]
    async fn test_ingest_inserts_only_new_urls() {
        let store = create_memory_store();
        let ingestor = ingestor(
            store.clone(),
            &[
                ("animal", &["u1", "u2", "u2"]),
                ("cat", &["u2", "u3"]),
                ("animal cat", &["u3"]),
            ],
        );

        let report = ingestor.ingest("animal", &["cat".to_string()]).await.unwrap();
        assert_eq!(report.search_words, 3);
        assert_eq!(report.new_images, 3);
        assert!(report.failed_words.is_empty());
        assert!(report.image_sets >= 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.keywords, 3);
        assert_eq!(stats.images, 3);
        assert_eq!(store.category_pool("animal").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_crawl_is_skipped() {
        let store = create_memory_store();
        let ingestor = ingestor(store.clone(), &[("animal", &["u1"])]);

        let report = ingestor.ingest("animal", &["cat".to_string()]).await.unwrap();
        let mut failed = report.failed_words.clone();
        failed.sort();
        assert_eq!(failed, vec!["animal cat", "cat"]);
        assert_eq!(report.new_images, 1);
        assert_eq!(store.stats().unwrap().keywords, 3);
    }

    #[tokio::test]
    async fn test_blank_category_rejected() {
        let ingestor = ingestor(create_memory_store(), &[]);
        assert!(ingestor.ingest(" ", &[]).await.is_err());
    }

    #[test]
    fn test_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            r#"{"query": "animal", "1": ["cat", "dog"], "3": ["owl"]}"#.as_bytes(),
        )
        .unwrap();

        let seed = SeedFile::load(file.path()).unwrap();
        assert_eq!(seed.category(), "animal");
        assert_eq!(seed.keywords(), vec!["cat", "dog", "owl"]);
    }
}
