use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use quizset::allocation::AllocationService;
use quizset::config::Config;
use quizset::generation::{GenerationOrchestrator, SupplyOutcome};
use quizset::ingest::{KeywordIngestor, SeedFile};
use quizset::models::{Allocation, Requester};
use quizset::partition::{size_distribution, SetPartitioner};
use quizset::random::SharedRng;
use quizset::storage::{run_blocking, SharedQuizStore};

use super::{build_crawler, build_generator, init_metrics, open_store};

fn rng(seed: Option<u64>) -> SharedRng {
    seed.map_or_else(SharedRng::from_entropy, SharedRng::seeded)
}

/// Orchestrator whose in-flight calls stop on Ctrl+C
fn orchestrator(config: &Config, store: SharedQuizStore, seed: Option<u64>) -> Result<GenerationOrchestrator> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling generation");
            on_signal.cancel();
        }
    });

    Ok(GenerationOrchestrator::new(
        store,
        build_generator(config)?,
        rng(seed),
        config.generation.clone(),
        cancel,
    ))
}

/// Crawl a category and its keywords, then partition the category
pub async fn ingest(
    config: Config,
    category: Option<String>,
    keywords: Vec<String>,
    seed_file: Option<PathBuf>,
) -> Result<()> {
    let (category, keywords) = match (seed_file, category) {
        (Some(path), _) => {
            let seed = SeedFile::load(&path)
                .with_context(|| format!("Failed to load seed file: {}", path.display()))?;
            (seed.category().to_string(), seed.keywords())
        }
        (None, Some(category)) => (category, keywords),
        (None, None) => bail!("either --category or --seed-file is required"),
    };

    println!("Ingesting keywords");
    println!("==================");
    println!("  Category: {category}");
    println!("  Keywords: {}", keywords.len());
    println!();

    init_metrics();
    let store = open_store(&config)?;
    let ingestor = KeywordIngestor::new(
        store.clone(),
        build_crawler(&config)?,
        SetPartitioner::new(store, SharedRng::from_entropy()),
        config.crawler.minimum_images,
        config.crawler.max_concurrent_keywords,
    );

    let report = ingestor.ingest(&category, &keywords).await?;

    println!("Search words:  {}", report.search_words);
    println!("Crawled URLs:  {}", report.crawled_urls);
    println!("New images:    {}", report.new_images);
    println!("Image sets:    {}", report.image_sets);
    if !report.failed_words.is_empty() {
        println!("Failed words:  {}", report.failed_words.join(", "));
    }
    Ok(())
}

/// Partition a category's image pool into new image sets
pub async fn partition(config: Config, category: String, seed: Option<u64>) -> Result<()> {
    let store = open_store(&config)?;
    let sets = SetPartitioner::new(store, rng(seed)).partition(&category).await?;

    let members: Vec<_> = sets.iter().map(|s| s.image_ids.clone()).collect();
    println!("Created {} image sets for '{category}'", sets.len());
    for (i, count) in size_distribution(&members).iter().enumerate() {
        println!("  size {}: {count}", i + 1);
    }
    Ok(())
}

/// Generate questions for one batch of unmapped image sets
pub async fn generate(config: Config, batch_size: Option<usize>, seed: Option<u64>) -> Result<()> {
    init_metrics();
    let store = open_store(&config)?;
    let orchestrator = orchestrator(&config, store, seed)?;
    let batch_size = batch_size.unwrap_or_else(|| orchestrator.batch_size());

    let report = orchestrator.generate_batch(batch_size).await?;

    println!("Selected:   {}", report.selected);
    println!("Generated:  {}", report.generated);
    println!("Failed:     {}", report.failed);
    println!("Total cost: ${:.4}", report.total_cost);
    if report.cancelled {
        println!("Batch was cancelled; finished sets were kept.");
    }
    Ok(())
}

/// Generate one batch if unused questions are at or below the low-water mark
pub async fn ensure_supply(config: Config, seed: Option<u64>) -> Result<()> {
    init_metrics();
    let store = open_store(&config)?;
    let orchestrator = orchestrator(&config, store, seed)?;

    match orchestrator.ensure_supply().await? {
        SupplyOutcome::Sufficient { unused } => {
            println!(
                "Supply sufficient: {unused} unused questions (low-water mark {})",
                config.generation.low_water_mark
            );
        }
        SupplyOutcome::Replenished { unused_before, report } => {
            println!("Supply was {unused_before}, generated {} new bundles", report.generated);
            println!("  failed: {}, cost: ${:.4}", report.failed, report.total_cost);
        }
    }
    Ok(())
}

/// Claim one question bundle and print it as JSON
pub async fn allocate(config: Config, image_count: i64, requester: String) -> Result<()> {
    let store = open_store(&config)?;
    let service = AllocationService::new(store, SharedRng::from_entropy());

    match service.allocate_raw(image_count, Requester::new(requester)).await? {
        Allocation::Claimed { question_id, view, .. } => {
            tracing::debug!(question_id = %question_id, "Claimed from CLI");
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Allocation::NotAvailable { image_count } => {
            println!("No unused image set available for image count {image_count}");
        }
    }
    Ok(())
}

/// Print row counts
pub async fn stats(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let stats = run_blocking(&store, |s| s.stats()).await?;

    println!("Database: {}", config.database.sqlite_path.display());
    println!("  keywords:          {}", stats.keywords);
    println!("  images:            {}", stats.images);
    println!("  image sets:        {}", stats.image_sets);
    println!("  questions:         {}", stats.questions);
    println!("  unused questions:  {}", stats.unused_questions);
    Ok(())
}

