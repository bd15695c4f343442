//! Configuration management for quizset
//!
//! This module handles loading and validating configuration from environment variables,
//! TOML files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Image crawler configuration
    pub crawler: CrawlerConfig,

    /// Question generator configuration
    pub llm: LlmConfig,

    /// Generation batch configuration
    pub generation: GenerationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8000`
    pub bind_address: String,

    /// Enable permissive CORS
    pub enable_cors: bool,

    /// Enable request tracing
    pub enable_request_logging: bool,

    /// Token accepted on admin and user endpoints
    pub admin_token: Option<String>,

    /// Tokens accepted on user endpoints
    pub user_tokens: Vec<String>,

    /// Periodic supply check interval in seconds (0 disables it)
    pub supply_check_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:8000"),
            enable_cors: true,
            enable_request_logging: true,
            admin_token: None,
            user_tokens: Vec::new(),
            supply_check_interval_secs: 0,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/quizset.db"),
        }
    }
}

/// Image crawler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Image search base URL
    pub base_url: String,

    /// Rate limit (requests per second)
    pub rate_limit: f64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Images to collect per keyword before stopping
    pub minimum_images: usize,

    /// Result pages to fetch per keyword at most
    pub max_trials: usize,

    /// Keywords crawled concurrently during ingestion
    pub max_concurrent_keywords: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://search.naver.com"),
            rate_limit: 2.0,
            request_timeout_secs: 30,
            minimum_images: 30,
            max_trials: 5,
            max_concurrent_keywords: 4,
        }
    }
}

/// Chat-completions API flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// `POST {endpoint}/v1/chat/completions` with a bearer token
    OpenAi,
    /// `POST {endpoint}/openai/deployments/{model}/chat/completions` with an `api-key` header
    Azure,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "azure" => Ok(Self::Azure),
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        }
    }
}

/// Question generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API flavor
    pub provider: LlmProvider,

    /// API endpoint
    pub endpoint: String,

    /// API key; read from `OPENAI_API_KEY` when absent
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Model (OpenAI) or deployment name (Azure)
    pub model: String,

    /// Azure API version
    pub api_version: String,

    /// Questions requested per image set
    pub question_count: usize,

    /// Price per prompt token
    pub input_price_per_token: f64,

    /// Price per completion token
    pub output_price_per_token: f64,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Optional handlebars template replacing the built-in system prompt
    pub prompt_path: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            endpoint: String::from("https://api.openai.com"),
            api_key: None,
            model: String::from("gpt-4o"),
            api_version: String::from("2024-08-01-preview"),
            question_count: 8,
            input_price_per_token: 5.0e-6,
            output_price_per_token: 15.0e-6,
            request_timeout_secs: 120,
            prompt_path: None,
        }
    }
}

/// Generation batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Image sets selected per batch
    pub batch_size: usize,

    /// Supply check triggers a batch at or below this many unused questions
    pub low_water_mark: usize,

    /// Generator calls in flight at once
    pub max_concurrency: usize,

    /// Per-set generator timeout in seconds
    pub timeout_secs: u64,

    /// Warn when unmapped sets drop below `batch_size` plus this margin
    pub unmapped_warning_margin: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            low_water_mark: 20,
            max_concurrency: 4,
            timeout_secs: 180,
            unmapped_warning_margin: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let provider = match std::env::var("QUIZSET_LLM_PROVIDER") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.llm.provider,
        };

        Ok(Self {
            server: ServerConfig {
                bind_address: env_or("QUIZSET_BIND_ADDRESS", defaults.server.bind_address),
                enable_cors: env_or("QUIZSET_ENABLE_CORS", defaults.server.enable_cors),
                enable_request_logging: defaults.server.enable_request_logging,
                admin_token: std::env::var("QUIZSET_ADMIN_TOKEN").ok(),
                user_tokens: env_list("QUIZSET_USER_TOKENS"),
                supply_check_interval_secs: env_or(
                    "QUIZSET_SUPPLY_CHECK_INTERVAL",
                    defaults.server.supply_check_interval_secs,
                ),
            },
            database: DatabaseConfig {
                sqlite_path: env_or("QUIZSET_SQLITE_PATH", defaults.database.sqlite_path),
            },
            crawler: CrawlerConfig {
                base_url: env_or("QUIZSET_CRAWLER_BASE_URL", defaults.crawler.base_url),
                rate_limit: env_or("QUIZSET_CRAWLER_RATE_LIMIT", defaults.crawler.rate_limit),
                request_timeout_secs: env_or(
                    "QUIZSET_CRAWLER_TIMEOUT",
                    defaults.crawler.request_timeout_secs,
                ),
                minimum_images: env_or("QUIZSET_MINIMUM_IMAGES", defaults.crawler.minimum_images),
                max_trials: env_or("QUIZSET_CRAWLER_MAX_TRIALS", defaults.crawler.max_trials),
                max_concurrent_keywords: defaults.crawler.max_concurrent_keywords,
            },
            llm: LlmConfig {
                provider,
                endpoint: env_or("QUIZSET_LLM_ENDPOINT", defaults.llm.endpoint),
                api_key: std::env::var("OPENAI_API_KEY").ok(),
                model: env_or("QUIZSET_LLM_MODEL", defaults.llm.model),
                api_version: env_or("QUIZSET_LLM_API_VERSION", defaults.llm.api_version),
                prompt_path: std::env::var("QUIZSET_PROMPT_PATH").ok().map(PathBuf::from),
                ..defaults.llm
            },
            generation: GenerationConfig {
                batch_size: env_or("QUIZSET_BATCH_SIZE", defaults.generation.batch_size),
                low_water_mark: env_or("QUIZSET_LOW_WATER_MARK", defaults.generation.low_water_mark),
                max_concurrency: env_or(
                    "QUIZSET_GENERATION_CONCURRENCY",
                    defaults.generation.max_concurrency,
                ),
                timeout_secs: env_or("QUIZSET_GENERATION_TIMEOUT", defaults.generation.timeout_secs),
                unmapped_warning_margin: defaults.generation.unmapped_warning_margin,
            },
            logging: LoggingConfig {
                level: env_or("QUIZSET_LOG_LEVEL", defaults.logging.level),
                format: env_or("QUIZSET_LOG_FORMAT", defaults.logging.format),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind_address
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind_address: {}", self.server.bind_address))?;

        if matches!(self.server.admin_token.as_deref(), Some("")) {
            anyhow::bail!("admin_token must not be empty when set");
        }

        if self.server.user_tokens.iter().any(String::is_empty) {
            anyhow::bail!("user_tokens must not contain empty tokens");
        }

        if self.crawler.rate_limit <= 0.0 {
            anyhow::bail!("rate_limit must be positive");
        }

        if self.crawler.minimum_images == 0 || self.crawler.max_trials == 0 {
            anyhow::bail!("minimum_images and max_trials must be greater than 0");
        }

        if self.crawler.max_concurrent_keywords == 0 {
            anyhow::bail!("max_concurrent_keywords must be greater than 0");
        }

        if self.llm.question_count == 0 {
            anyhow::bail!("question_count must be greater than 0");
        }

        if self.generation.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.generation.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be greater than 0");
        }

        if self.generation.timeout_secs == 0 {
            anyhow::bail!("generation timeout_secs must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "pretty" | "json") {
            anyhow::bail!("logging format must be text or json");
        }

        Ok(())
    }

    /// Per-set generator timeout
    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    /// Crawler request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }

    /// Supply check interval, if enabled
    #[must_use]
    pub fn supply_check_interval(&self) -> Option<Duration> {
        match self.server.supply_check_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_batch_size() {
        let mut config = Config::default();
        config.generation.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = String::from("not-an-address");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_admin_token_rejected() {
        let mut config = Config::default();
        config.server.admin_token = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supply_check_interval() {
        let mut config = Config::default();
        assert_eq!(config.supply_check_interval(), None);
        config.server.supply_check_interval_secs = 60;
        assert_eq!(config.supply_check_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [generation]
            batch_size = 12

            [llm]
            provider = "azure"
            "#,
        )
        .unwrap();

        assert_eq!(config.generation.batch_size, 12);
        assert_eq!(config.generation.low_water_mark, 20);
        assert_eq!(config.llm.provider, LlmProvider::Azure);
        assert_eq!(config.server.bind_address, "0.0.0.0:8000");
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert!("bard".parse::<LlmProvider>().is_err());
    }
}
