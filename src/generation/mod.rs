//! Question generation orchestration
//!
//! Picks image sets that have no question bundle yet, asks the
//! [`QuestionGenerator`] about each one through the [`WorkerPool`], and
//! commits every successful bundle in one store transaction. A failure for
//! one set never sinks the batch; a failed commit does.

pub mod pool;

use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationConfig;
use crate::error::Result;
use crate::llm::QuestionGenerator;
use crate::metrics;
use crate::models::{ImageSetId, NewQuestion};
use crate::random::SharedRng;
use crate::storage::{run_blocking, SharedQuizStore, StoreResult};

pub use pool::{TaskError, WorkerPool};

/// Outcome of one generation batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Unmapped sets picked for this batch
    pub selected: usize,
    /// Sets whose questions were committed
    pub generated: usize,
    /// Sets skipped because generation failed, timed out or was cancelled
    pub failed: usize,
    /// Sum of the committed bundles' cost
    pub total_cost: f64,
    /// The pool was cancelled while the batch ran
    pub cancelled: bool,
}

/// Outcome of a supply check
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SupplyOutcome {
    /// Enough unused questions; nothing was generated
    Sufficient { unused: usize },
    /// Supply was at or below the low-water mark; one batch ran
    Replenished { unused_before: usize, report: BatchReport },
}

/// Drives question generation for unmapped image sets
pub struct GenerationOrchestrator {
    store: SharedQuizStore,
    generator: Arc<dyn QuestionGenerator>,
    pool: WorkerPool,
    rng: SharedRng,
    config: GenerationConfig,
}

impl GenerationOrchestrator {
    pub fn new(
        store: SharedQuizStore,
        generator: Arc<dyn QuestionGenerator>,
        rng: SharedRng,
        config: GenerationConfig,
        cancel: CancellationToken,
    ) -> Self {
        let pool = WorkerPool::new(
            config.max_concurrency,
            std::time::Duration::from_secs(config.timeout_secs),
            cancel,
        );
        Self {
            store,
            generator,
            pool,
            rng,
            config,
        }
    }

    /// Configured batch size
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Stop starting new generator calls and abort running ones
    pub fn shutdown(&self) {
        self.pool.cancel();
    }

    /// Generate questions for up to `batch_size` random unmapped sets
    pub async fn generate_batch(&self, batch_size: usize) -> Result<BatchReport> {
        let _timer = metrics::start_generation_timer();

        let unmapped = run_blocking(&self.store, |s| s.unmapped_image_set_ids()).await?;
        if unmapped.len() < batch_size + self.config.unmapped_warning_margin {
            tracing::warn!(
                available = unmapped.len(),
                batch_size,
                "Unmapped image sets are running low"
            );
        }
        if unmapped.is_empty() {
            tracing::info!("No unmapped image sets, nothing to generate");
            return Ok(BatchReport::default());
        }

        let selected: Vec<ImageSetId> = {
            let mut rng = self.rng.fork();
            unmapped
                .choose_multiple(&mut rng, batch_size)
                .copied()
                .collect()
        };

        let jobs = {
            let selected = selected.clone();
            run_blocking(&self.store, move |s| {
                selected
                    .into_iter()
                    .map(|id| Ok((id, s.image_set_urls(id)?)))
                    .collect::<StoreResult<Vec<(ImageSetId, Vec<String>)>>>()
            })
            .await?
        };

        let mut report = BatchReport {
            selected: selected.len(),
            ..BatchReport::default()
        };

        let (jobs, empty): (Vec<_>, Vec<_>) = jobs.into_iter().partition(|(_, urls)| !urls.is_empty());
        for (set_id, _) in &empty {
            tracing::warn!(image_set_id = %set_id, "Image set has no member URLs, skipping");
        }
        report.failed += empty.len();

        let generator = &self.generator;
        let outcomes = self
            .pool
            .run_all(jobs, |(_, urls)| {
                let generator = Arc::clone(generator);
                async move { generator.generate(&urls).await }
            })
            .await;

        let mut questions = Vec::with_capacity(outcomes.len());
        for ((set_id, _), outcome) in outcomes {
            match outcome {
                Ok(generated) => {
                    report.total_cost += generated.total_cost;
                    questions.push(NewQuestion {
                        image_set_id: set_id,
                        questions: generated.questions,
                        cost: generated.total_cost,
                        created_at: Utc::now(),
                    });
                }
                Err(TaskError::Cancelled) => {
                    report.cancelled = true;
                    report.failed += 1;
                    tracing::debug!(image_set_id = %set_id, "Generation cancelled");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(image_set_id = %set_id, error = %e, "Question generation failed, skipping set");
                }
            }
        }

        if !questions.is_empty() {
            let count = questions.len();
            run_blocking(&self.store, move |s| s.insert_questions(&questions)).await?;
            report.generated = count;
        }

        if report.cancelled {
            tracing::info!(generated = report.generated, "Generation batch cancelled, committed finished sets");
        }

        tracing::info!(
            selected = report.selected,
            generated = report.generated,
            failed = report.failed,
            total_cost = report.total_cost,
            "Generation batch complete"
        );
        metrics::record_generation_batch(report.generated, report.failed, report.total_cost);
        if let Ok(unused) = run_blocking(&self.store, |s| s.count_unused_questions()).await {
            metrics::set_unused_questions(unused);
        }

        Ok(report)
    }

    /// Run one batch if unused questions are at or below the low-water mark
    pub async fn ensure_supply(&self) -> Result<SupplyOutcome> {
        let unused = run_blocking(&self.store, |s| s.count_unused_questions()).await?;
        metrics::set_unused_questions(unused);

        if unused > self.config.low_water_mark {
            tracing::debug!(unused, low_water_mark = self.config.low_water_mark, "Question supply sufficient");
            return Ok(SupplyOutcome::Sufficient { unused });
        }

        tracing::info!(
            unused,
            low_water_mark = self.config.low_water_mark,
            "Question supply low, generating a batch"
        );
        let report = self.generate_batch(self.config.batch_size).await?;
        Ok(SupplyOutcome::Replenished {
            unused_before: unused,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GeneratedQuestions, GenerationError};
    use crate::storage::create_memory_store;
    use async_trait::async_trait;

    struct EchoGenerator;

    #[async_trait]
    impl QuestionGenerator for EchoGenerator {
        async fn generate(
            &self,
            image_urls: &[String],
        ) -> std::result::Result<GeneratedQuestions, GenerationError> {
            Ok(GeneratedQuestions {
                questions: image_urls.iter().map(|u| format!("What is in {u}?")).collect(),
                total_cost: 0.5,
            })
        }
    }

    fn orchestrator(store: SharedQuizStore, config: GenerationConfig) -> GenerationOrchestrator {
        GenerationOrchestrator::new(
            store,
            Arc::new(EchoGenerator),
            SharedRng::seeded(4),
            config,
            CancellationToken::new(),
        )
    }

    fn seed_sets(store: &SharedQuizStore, n: usize) -> Vec<ImageSetId> {
        let kw = store.upsert_keyword("animal", "animal").unwrap();
        let urls: Vec<String> = (0..n).map(|i| format!("https://img.test/{i}.jpg")).collect();
        let images = store.insert_new_images(kw.id, &urls).unwrap();
        let sets: Vec<Vec<_>> = images.iter().map(|img| vec![img.id]).collect();
        store.create_image_sets(&sets, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_batch_limits_selection() {
        let store = create_memory_store();
        seed_sets(&store, 5);
        let orchestrator = orchestrator(store.clone(), GenerationConfig::default());

        let report = orchestrator.generate_batch(3).await.unwrap();
        assert_eq!(report.selected, 3);
        assert_eq!(report.generated, 3);
        assert_eq!(report.failed, 0);
        assert!((report.total_cost - 1.5).abs() < 1e-9);
        assert_eq!(store.unmapped_image_set_ids().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_takes_all_when_short() {
        let store = create_memory_store();
        seed_sets(&store, 2);
        let orchestrator = orchestrator(store.clone(), GenerationConfig::default());

        let report = orchestrator.generate_batch(10).await.unwrap();
        assert_eq!(report.generated, 2);
        assert!(store.unmapped_image_set_ids().unwrap().is_empty());

        let again = orchestrator.generate_batch(10).await.unwrap();
        assert_eq!(again, BatchReport::default());
    }

    #[tokio::test]
    async fn test_ensure_supply_threshold() {
        let store = create_memory_store();
        seed_sets(&store, 6);
        let config = GenerationConfig {
            batch_size: 4,
            low_water_mark: 3,
            ..GenerationConfig::default()
        };
        let orchestrator = orchestrator(store.clone(), config);

        let first = orchestrator.ensure_supply().await.unwrap();
        assert!(matches!(
            first,
            SupplyOutcome::Replenished { unused_before: 0, ref report } if report.generated == 4
        ));

        let second = orchestrator.ensure_supply().await.unwrap();
        assert_eq!(second, SupplyOutcome::Sufficient { unused: 4 });
    }

    #[tokio::test]
    async fn test_shutdown_skips_generation() {
        let store = create_memory_store();
        seed_sets(&store, 3);
        let orchestrator = orchestrator(store.clone(), GenerationConfig::default());
        orchestrator.shutdown();

        let report = orchestrator.generate_batch(3).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.generated, 0);
        assert_eq!(report.failed, 3);
        assert_eq!(store.stats().unwrap().questions, 0);
    }
}
