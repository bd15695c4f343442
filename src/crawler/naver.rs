//! Naver image search crawler
//!
//! Fetches result pages for a keyword, pulls `img` sources out of the image
//! tiles and keeps the ones served through Naver's image proxy. Requests are
//! rate limited with governor and sent with a rotating User-Agent.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT},
    Client, StatusCode,
};
use scraper::{Html, Selector};
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

use super::{dedupe_urls, CrawlError, ImageCrawler};
use crate::config::CrawlerConfig;

/// Only proxied thumbnails are kept
pub const IMAGE_URL_PREFIX: &str = "https://search.pstatic.net/common/?src=";

/// Results per page; each trial advances `start` by this much
const PAGE_SIZE: usize = 50;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    static ref IMAGE_TILE: Selector = parse_selector!(".image_tile_bx img");
}

/// Extract proxied image URLs from a result page, in document order
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&IMAGE_TILE)
        .filter_map(|img| img.value().attr("src"))
        .filter(|src| src.starts_with(IMAGE_URL_PREFIX))
        .map(String::from)
        .collect()
}

/// Naver image search crawler
pub struct NaverImageCrawler {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    base_url: String,
    max_trials: usize,
}

impl NaverImageCrawler {
    /// Create a crawler from configuration
    pub fn new(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        Self::with_base_url(
            &config.base_url,
            config.rate_limit,
            config.max_trials,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Create a crawler against a custom base URL (mock servers in tests)
    pub fn with_base_url(
        base_url: &str,
        requests_per_second: f64,
        max_trials: usize,
        timeout: Duration,
    ) -> Result<Self, CrawlError> {
        Url::parse(base_url).map_err(|e| CrawlError::InvalidUrl(format!("{base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .cookie_store(true)
            .build()?;

        let rate = NonZeroU32::new(requests_per_second.ceil() as u32).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_trials: max_trials.max(1),
        })
    }

    fn search_url(&self, keyword: &str, start: usize) -> Result<Url, CrawlError> {
        let start = start.to_string();
        Url::parse_with_params(
            &format!("{}/search.naver", self.base_url),
            &[("where", "image"), ("query", keyword), ("start", start.as_str())],
        )
        .map_err(|e| CrawlError::InvalidUrl(e.to_string()))
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        let agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers
    }

    async fn fetch_page(&self, url: Url) -> Result<String, CrawlError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .headers(Self::build_headers())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CrawlError::Timeout
                } else {
                    CrawlError::Http(e)
                }
            })?;

        match response.status() {
            status if status.is_success() => Ok(response.text().await?),
            StatusCode::TOO_MANY_REQUESTS => Err(CrawlError::RateLimit),
            status => Err(CrawlError::ServerError(status.as_u16())),
        }
    }
}

#[async_trait]
impl ImageCrawler for NaverImageCrawler {
    async fn crawl(&self, keyword: &str, minimum_images: usize) -> Result<Vec<String>, CrawlError> {
        let mut collected: Vec<String> = Vec::new();

        for trial in 0..self.max_trials {
            if collected.len() >= minimum_images {
                break;
            }

            let url = self.search_url(keyword, trial * PAGE_SIZE + 1)?;
            let html = match self.fetch_page(url).await {
                Ok(html) => html,
                Err(e) if !collected.is_empty() => {
                    tracing::warn!(
                        keyword = %keyword,
                        trial = trial + 1,
                        found = collected.len(),
                        error = %e,
                        "Result page failed, keeping images found so far"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            let page = extract_image_urls(&html);
            let before = collected.len();
            collected = dedupe_urls(collected.into_iter().chain(page));

            tracing::info!(
                keyword = %keyword,
                trial = trial + 1,
                found = collected.len(),
                "Crawled image search page"
            );

            if collected.len() == before {
                break;
            }
        }

        Ok(collected)
    }
}
