//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use quizset::config::Config;
use quizset::crawler::{CrawlError, ImageCrawler};
use quizset::llm::{GeneratedQuestions, GenerationError, QuestionGenerator};
use quizset::models::{
    ClaimedQuestion, Image, ImageId, ImageInfo, ImageSet, ImageSetId, Keyword, KeywordId,
    NewQuestion, Question, QuestionId, Requester, StoreStats,
};
use quizset::random::SharedRng;
use quizset::server::AppState;
use quizset::storage::{QuizStore, SharedQuizStore, StoreError, StoreResult};

pub const ADMIN_TOKEN: &str = "admin-secret";
pub const USER_TOKEN: &str = "user-secret";

/// Image URL used by fixtures
pub fn image_url(category: &str, i: usize) -> String {
    format!("https://search.pstatic.net/common/?src={category}-{i}.jpg")
}

/// Insert `count` images under one keyword of `category`
pub fn seed_images(store: &SharedQuizStore, category: &str, count: usize) -> Vec<quizset::models::Image> {
    let keyword = store.upsert_keyword(category, category).unwrap();
    let urls: Vec<String> = (0..count).map(|i| image_url(category, i)).collect();
    store.insert_new_images(keyword.id, &urls).unwrap()
}

/// One image set per entry of `sizes`, drawn from fresh images of `category`
pub fn seed_sets(store: &SharedQuizStore, category: &str, sizes: &[usize]) -> Vec<ImageSetId> {
    let images = seed_images(store, category, sizes.iter().sum());
    let mut offset = 0;
    let sets: Vec<Vec<_>> = sizes
        .iter()
        .map(|&size| {
            let set = images[offset..offset + size].iter().map(|i| i.id).collect();
            offset += size;
            set
        })
        .collect();
    store.create_image_sets(&sets, Utc::now()).unwrap()
}

/// Attach a question bundle to every given set
pub fn seed_questions(store: &SharedQuizStore, sets: &[ImageSetId]) {
    let bundles: Vec<NewQuestion> = sets
        .iter()
        .map(|&id| NewQuestion {
            image_set_id: id,
            questions: vec![format!("What is shown in set {id}?")],
            cost: 0.01,
            created_at: Utc::now(),
        })
        .collect();
    store.insert_questions(&bundles).unwrap();
}

/// Generator answering one question per image URL
pub struct EchoGenerator;

#[async_trait]
impl QuestionGenerator for EchoGenerator {
    async fn generate(&self, image_urls: &[String]) -> Result<GeneratedQuestions, GenerationError> {
        Ok(GeneratedQuestions {
            questions: image_urls.iter().map(|u| format!("What is in {u}?")).collect(),
            total_cost: 0.25,
        })
    }
}

/// Generator that fails or stalls on chosen URLs and echoes otherwise
#[derive(Default)]
pub struct ScriptedGenerator {
    pub failing: HashSet<String>,
    pub stalling: HashSet<String>,
}

#[async_trait]
impl QuestionGenerator for ScriptedGenerator {
    async fn generate(&self, image_urls: &[String]) -> Result<GeneratedQuestions, GenerationError> {
        if image_urls.iter().any(|u| self.stalling.contains(u)) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if image_urls.iter().any(|u| self.failing.contains(u)) {
            return Err(GenerationError::Api {
                status: 500,
                body: "upstream exploded".to_string(),
            });
        }
        EchoGenerator.generate(image_urls).await
    }
}

/// Crawler serving canned results per keyword; unknown keywords fail
#[derive(Default)]
pub struct StaticCrawler {
    pub pages: HashMap<String, Vec<String>>,
}

impl StaticCrawler {
    pub fn with(mut self, keyword: &str, urls: &[String]) -> Self {
        self.pages.insert(keyword.to_string(), urls.to_vec());
        self
    }
}

#[async_trait]
impl ImageCrawler for StaticCrawler {
    async fn crawl(&self, keyword: &str, _minimum_images: usize) -> Result<Vec<String>, CrawlError> {
        self.pages
            .get(keyword)
            .cloned()
            .ok_or(CrawlError::ServerError(503))
    }
}

/// Store operation that [`FaultyStore`] makes fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `insert_questions`
    Commit,
    /// `claim_question`
    Claim,
    /// `image_info`
    ImageInfo,
}

/// Delegates to `inner` except for one operation that always fails
pub struct FaultyStore {
    pub inner: SharedQuizStore,
    pub fault: Fault,
}

impl FaultyStore {
    pub fn shared(inner: &SharedQuizStore, fault: Fault) -> SharedQuizStore {
        Arc::new(Self {
            inner: inner.clone(),
            fault,
        })
    }

    fn fail<T>(&self) -> StoreResult<T> {
        Err(StoreError::Task(format!("{:?} failed: disk full", self.fault)))
    }
}

impl QuizStore for FaultyStore {
    fn upsert_keyword(&self, text: &str, category: &str) -> StoreResult<Keyword> {
        self.inner.upsert_keyword(text, category)
    }

    fn find_image(&self, url: &str) -> StoreResult<Option<Image>> {
        self.inner.find_image(url)
    }

    fn insert_new_images(&self, keyword_id: KeywordId, urls: &[String]) -> StoreResult<Vec<Image>> {
        self.inner.insert_new_images(keyword_id, urls)
    }

    fn link_keyword_image(&self, keyword_id: KeywordId, image_id: ImageId) -> StoreResult<bool> {
        self.inner.link_keyword_image(keyword_id, image_id)
    }

    fn category_pool(&self, category: &str) -> StoreResult<Vec<ImageId>> {
        self.inner.category_pool(category)
    }

    fn create_image_sets(
        &self,
        sets: &[Vec<ImageId>],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ImageSetId>> {
        self.inner.create_image_sets(sets, created_at)
    }

    fn get_image_set(&self, id: ImageSetId) -> StoreResult<Option<ImageSet>> {
        self.inner.get_image_set(id)
    }

    fn unmapped_image_set_ids(&self) -> StoreResult<Vec<ImageSetId>> {
        self.inner.unmapped_image_set_ids()
    }

    fn image_set_urls(&self, id: ImageSetId) -> StoreResult<Vec<String>> {
        self.inner.image_set_urls(id)
    }

    fn insert_questions(&self, questions: &[NewQuestion]) -> StoreResult<Vec<QuestionId>> {
        if self.fault == Fault::Commit {
            return self.fail();
        }
        self.inner.insert_questions(questions)
    }

    fn get_question(&self, id: QuestionId) -> StoreResult<Option<Question>> {
        self.inner.get_question(id)
    }

    fn count_unused_questions(&self) -> StoreResult<usize> {
        self.inner.count_unused_questions()
    }

    fn claim_question(
        &self,
        image_count: usize,
        requester: &Requester,
        now: DateTime<Utc>,
        rng: &mut dyn RngCore,
    ) -> StoreResult<Option<ClaimedQuestion>> {
        if self.fault == Fault::Claim {
            return self.fail();
        }
        self.inner.claim_question(image_count, requester, now, rng)
    }

    fn image_info(&self, set_id: ImageSetId) -> StoreResult<Vec<ImageInfo>> {
        if self.fault == Fault::ImageInfo {
            return self.fail();
        }
        self.inner.image_info(set_id)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        self.inner.stats()
    }
}

/// Config with the fixture tokens
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.admin_token = Some(ADMIN_TOKEN.to_string());
    config.server.user_tokens = vec![USER_TOKEN.to_string()];
    config.generation.batch_size = 10;
    config
}

/// Application state over `store` with stub collaborators
pub fn test_state(store: SharedQuizStore) -> AppState {
    AppState::new(
        &test_config(),
        store,
        Arc::new(StaticCrawler::default()),
        Arc::new(EchoGenerator),
        SharedRng::seeded(42),
    )
    .unwrap()
}
