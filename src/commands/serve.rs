use anyhow::{Context, Result};

use quizset::config::Config;
use quizset::random::SharedRng;
use quizset::server::{AppState, QuizServer};

use super::{build_crawler, build_generator, init_metrics, open_store};

/// Start the quiz API server
pub async fn serve(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind_address = bind;
        config.validate()?;
    }

    init_metrics();

    let store = open_store(&config)?;
    let state = AppState::new(
        &config,
        store,
        build_crawler(&config)?,
        build_generator(&config)?,
        SharedRng::from_entropy(),
    )
    .context("Failed to initialize application state")?;

    let server =
        QuizServer::new(config.server.clone(), state).context("Failed to create quiz server")?;

    println!("{}", server.info().display());
    println!("  Database: {}", config.database.sqlite_path.display());
    println!();
    println!("API Endpoints:");
    println!("  GET  /                     - Preview page");
    println!("  GET  /health               - Health check");
    println!("  GET  /metrics              - Prometheus metrics endpoint");
    println!("  GET  /v1/stats             - Row counts (admin)");
    println!("  POST /v1/keywords          - Crawl keywords into the image pool (admin)");
    println!("  POST /v1/questions         - Generate one question batch (admin)");
    println!("  POST /v1/batch/questions   - Generate if supply is low (admin)");
    println!("  GET  /v1/questions         - Claim a question bundle");
    println!();
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to wait for Ctrl+C"),
            }
        })
        .await?;

    println!("Quiz server stopped.");
    Ok(())
}
