use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizset::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "quizset",
    version,
    about = "Image-set quiz pipeline: crawl images, generate questions, hand them out once",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8000
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Crawl a category and its keywords into the image pool
    Ingest {
        /// Category to crawl
        #[arg(long)]
        category: Option<String>,

        /// Keywords within the category
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// JSON seed file with `query` and keyword groups "1", "2", "3"
        #[arg(long, conflicts_with_all = ["category", "keywords"])]
        seed_file: Option<PathBuf>,
    },

    /// Partition a category's image pool into image sets
    Partition {
        /// Category to partition
        category: String,

        /// Seed for reproducible partitions
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate questions for one batch of unmapped image sets
    Generate {
        /// Override generation.batch_size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Seed for reproducible set selection
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate one batch if unused questions are running low
    EnsureSupply {
        /// Seed for reproducible set selection
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Claim one question bundle
    Allocate {
        /// Images per set (0 = any, 1..=3)
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        image_count: i64,

        /// Requester id recorded on the claimed bundle
        #[arg(short, long, default_value = "cli")]
        requester: String,
    },

    /// Show row counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("quizset starting");

    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!(bind = ?bind, "Starting serve command");
            commands::serve(config, bind).await?;
        }

        Commands::Ingest {
            category,
            keywords,
            seed_file,
        } => {
            tracing::info!(
                category = ?category,
                keywords = keywords.len(),
                seed_file = ?seed_file,
                "Starting ingest command"
            );
            commands::ingest(config, category, keywords, seed_file).await?;
        }

        Commands::Partition { category, seed } => {
            tracing::info!(category = %category, seed = ?seed, "Starting partition command");
            commands::partition(config, category, seed).await?;
        }

        Commands::Generate { batch_size, seed } => {
            tracing::info!(batch_size = ?batch_size, seed = ?seed, "Starting generate command");
            commands::generate(config, batch_size, seed).await?;
        }

        Commands::EnsureSupply { seed } => {
            tracing::info!(seed = ?seed, "Starting ensure-supply command");
            commands::ensure_supply(config, seed).await?;
        }

        Commands::Allocate {
            image_count,
            requester,
        } => {
            tracing::info!(image_count, requester = %requester, "Starting allocate command");
            commands::allocate(config, image_count, requester).await?;
        }

        Commands::Stats => {
            commands::stats(config).await?;
        }
    }

    tracing::info!("quizset completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("quizset=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("quizset={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
