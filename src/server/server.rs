//! Quiz server implementation
//!
//! Wires the store and services into shared state, builds the router and
//! runs it until the shutdown signal fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::allocation::AllocationService;
use crate::config::{Config, ServerConfig};
use crate::crawler::ImageCrawler;
use crate::generation::GenerationOrchestrator;
use crate::ingest::KeywordIngestor;
use crate::llm::QuestionGenerator;
use crate::partition::SetPartitioner;
use crate::random::SharedRng;
use crate::storage::SharedQuizStore;

use super::api::create_router;
use super::auth::TokenRegistry;
use super::ui::PreviewPage;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: SharedQuizStore,

    /// Claims question bundles for requesters
    pub allocation: AllocationService,

    /// Generates question bundles for unmapped sets
    pub orchestrator: Arc<GenerationOrchestrator>,

    /// Crawls keywords into the image pool
    pub ingestor: Arc<KeywordIngestor>,

    pub tokens: Arc<TokenRegistry>,

    pub preview: Arc<PreviewPage>,

    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,

    pub start_time: Instant,
}

impl AppState {
    /// Build every service on top of `store` and the two collaborators
    pub fn new(
        config: &Config,
        store: SharedQuizStore,
        crawler: Arc<dyn ImageCrawler>,
        generator: Arc<dyn QuestionGenerator>,
        rng: SharedRng,
    ) -> Result<Self, ServerError> {
        let shutdown = CancellationToken::new();

        let orchestrator = GenerationOrchestrator::new(
            store.clone(),
            generator,
            rng.clone(),
            config.generation.clone(),
            shutdown.child_token(),
        );
        let ingestor = KeywordIngestor::new(
            store.clone(),
            crawler,
            SetPartitioner::new(store.clone(), rng.clone()),
            config.crawler.minimum_images,
            config.crawler.max_concurrent_keywords,
        );
        let preview = PreviewPage::new().map_err(|e| ServerError::Init(e.to_string()))?;

        Ok(Self {
            allocation: AllocationService::new(store.clone(), rng),
            orchestrator: Arc::new(orchestrator),
            ingestor: Arc::new(ingestor),
            tokens: Arc::new(TokenRegistry::from_config(&config.server)),
            preview: Arc::new(preview),
            store,
            shutdown,
            start_time: Instant::now(),
        })
    }
}

// ============================================================================
// Quiz Server
// ============================================================================

/// HTTP front end for allocation and the admin pipeline triggers
pub struct QuizServer {
    config: ServerConfig,
    bind_address: SocketAddr,
    state: AppState,
}

impl QuizServer {
    pub fn new(config: ServerConfig, state: AppState) -> Result<Self, ServerError> {
        let bind_address = config
            .bind_address
            .parse()
            .map_err(|e| ServerError::Config(format!("{}: {e}", config.bind_address)))?;

        if !state.tokens.has_admin() {
            tracing::warn!("No admin token configured, admin endpoints will reject every request");
        }

        Ok(Self {
            config,
            bind_address,
            state,
        })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves, then cancel background work
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();

        tracing::info!(address = %self.bind_address, "Starting quiz server");

        self.start_background_tasks();

        let listener = tokio::net::TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()));

        self.state.shutdown.cancel();
        tracing::info!("Quiz server shutdown complete");
        result
    }

    fn start_background_tasks(&self) {
        let Some(interval) = supply_interval(&self.config) else {
            return;
        };

        let orchestrator = self.state.orchestrator.clone();
        let shutdown = self.state.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.ensure_supply().await {
                            tracing::error!(error = %e, "Periodic supply check failed");
                        }
                    }
                }
            }
            tracing::debug!("Supply check loop stopped");
        });

        tracing::info!(interval_secs = interval.as_secs(), "Periodic supply check started");
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.bind_address,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
            supply_check_interval: supply_interval(&self.config),
        }
    }
}

fn supply_interval(config: &ServerConfig) -> Option<Duration> {
    match config.supply_check_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
    pub supply_check_interval: Option<Duration>,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Quiz Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             CORS: {}\n\
             Request Logging: {}\n\
             Supply Check: {}",
            "",
            self.bind_address,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" },
            self.supply_check_interval
                .map(|d| format!("every {}s", d.as_secs()))
                .unwrap_or_else(|| "disabled".to_string())
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Failed to bind: {0}")]
    Bind(String),

    #[error("Server error: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::CrawlError;
    use crate::llm::{GeneratedQuestions, GenerationError};
    use crate::storage::create_memory_store;
    use async_trait::async_trait;

    struct NoCrawler;

    #[async_trait]
    impl ImageCrawler for NoCrawler {
        async fn crawl(&self, _keyword: &str, _minimum: usize) -> Result<Vec<String>, CrawlError> {
            Ok(Vec::new())
        }
    }

    struct NoGenerator;

    #[async_trait]
    impl QuestionGenerator for NoGenerator {
        async fn generate(&self, _urls: &[String]) -> Result<GeneratedQuestions, GenerationError> {
            Err(GenerationError::EmptyResponse)
        }
    }

    fn state(config: &Config) -> AppState {
        AppState::new(
            config,
            create_memory_store(),
            Arc::new(NoCrawler),
            Arc::new(NoGenerator),
            SharedRng::seeded(1),
        )
        .unwrap()
    }

    #[test]
    fn test_server_info() {
        let mut config = Config::default();
        config.server.supply_check_interval_secs = 60;
        let server = QuizServer::new(config.server.clone(), state(&config)).unwrap();
        let info = server.info();

        assert_eq!(info.bind_address.port(), 8000);
        assert_eq!(info.supply_check_interval, Some(Duration::from_secs(60)));
        assert!(info.display().contains("every 60s"));
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "not-an-address".into();
        let result = QuizServer::new(config.server.clone(), state(&config));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_orchestrator_follows_shutdown() {
        let config = Config::default();
        let state = state(&config);
        let kw = state.store.upsert_keyword("animal", "animal").unwrap();
        let images = state
            .store
            .insert_new_images(kw.id, &["https://img.test/a.jpg".to_string()])
            .unwrap();
        state
            .store
            .create_image_sets(&[vec![images[0].id]], chrono::Utc::now())
            .unwrap();

        state.shutdown.cancel();
        let report = state.orchestrator.generate_batch(1).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.generated, 0);
    }
}
