//! Allocation of unused question bundles to requesters
//!
//! A request names an image count (or "any"). The service resolves "any" to a
//! concrete size and asks the store to claim one matching bundle atomically.
//! The claim also resolves the set into `{keyword, image_url}` rows, so a
//! bundle is only marked used when its whole view was read.

use chrono::Utc;

use crate::error::Result;
use crate::metrics;
use crate::models::{Allocation, ClaimedQuestion, ImageCount, QuestionView, Requester};
use crate::random::SharedRng;
use crate::storage::{run_blocking, SharedQuizStore};

/// Hands out each question bundle to at most one requester
#[derive(Clone)]
pub struct AllocationService {
    store: SharedQuizStore,
    rng: SharedRng,
}

impl AllocationService {
    pub fn new(store: SharedQuizStore, rng: SharedRng) -> Self {
        Self { store, rng }
    }

    /// Claim one unused bundle whose image set has the requested size
    ///
    /// Returns [`Allocation::NotAvailable`] when nothing matches. Claimed
    /// bundles are never handed out again.
    pub async fn allocate(&self, image_count: ImageCount, requester: Requester) -> Result<Allocation> {
        let mut rng = self.rng.fork();
        let size = image_count.resolve(&mut rng);

        let claimed = {
            let requester = requester.clone();
            run_blocking(&self.store, move |s| {
                s.claim_question(size, &requester, Utc::now(), &mut rng)
            })
            .await?
        };

        let Some(ClaimedQuestion {
            question,
            image_info,
        }) = claimed
        else {
            tracing::info!(image_count = size, requester = %requester, "No unused question available");
            metrics::record_allocation(size, false);
            return Ok(Allocation::NotAvailable { image_count: size });
        };

        tracing::info!(
            question_id = %question.id,
            image_set_id = %question.image_set_id,
            image_count = size,
            requester = %requester,
            "Question claimed"
        );
        metrics::record_allocation(size, true);

        Ok(Allocation::Claimed {
            question_id: question.id,
            image_count: size,
            view: QuestionView {
                image_info,
                questions: question.questions,
            },
        })
    }

    /// Parse a raw `image_count` and allocate
    pub async fn allocate_raw(&self, image_count: i64, requester: Requester) -> Result<Allocation> {
        let image_count = ImageCount::try_from(image_count)?;
        self.allocate(image_count, requester).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::NewQuestion;
    use crate::storage::create_memory_store;

    fn seed(store: &SharedQuizStore) {
        let kw = store.upsert_keyword("animal", "animal").unwrap();
        let urls: Vec<String> = (0..3).map(|i| format!("https://img.test/{i}.jpg")).collect();
        let images = store.insert_new_images(kw.id, &urls).unwrap();
        let sets = store
            .create_image_sets(&[vec![images[0].id, images[1].id], vec![images[2].id]], Utc::now())
            .unwrap();
        store
            .insert_questions(&[
                NewQuestion {
                    image_set_id: sets[0],
                    questions: vec!["Which one is bigger?".into()],
                    cost: 0.1,
                    created_at: Utc::now(),
                },
                NewQuestion {
                    image_set_id: sets[1],
                    questions: vec!["What animal is this?".into()],
                    cost: 0.1,
                    created_at: Utc::now(),
                },
            ])
            .unwrap();
    }

    #[tokio::test]
    async fn test_allocate_exact_count() {
        let store = create_memory_store();
        seed(&store);
        let service = AllocationService::new(store.clone(), SharedRng::seeded(1));

        let allocation = service
            .allocate(ImageCount::Two, Requester::new("alice"))
            .await
            .unwrap();
        let Allocation::Claimed { image_count, view, .. } = allocation else {
            panic!("expected a claim");
        };
        assert_eq!(image_count, 2);
        assert_eq!(view.image_info.len(), 2);
        assert_eq!(view.questions, vec!["Which one is bigger?"]);

        let again = service
            .allocate(ImageCount::Two, Requester::new("bob"))
            .await
            .unwrap();
        assert_eq!(again, Allocation::NotAvailable { image_count: 2 });
    }

    #[tokio::test]
    async fn test_allocate_any_resolves_to_size() {
        let store = create_memory_store();
        seed(&store);
        let service = AllocationService::new(store.clone(), SharedRng::seeded(2));

        for _ in 0..100 {
            match service.allocate(ImageCount::Any, Requester::new("carol")).await.unwrap() {
                Allocation::Claimed { image_count, view, .. } => {
                    assert_eq!(view.image_info.len(), image_count);
                }
                Allocation::NotAvailable { image_count } => {
                    assert!((1..=3).contains(&image_count));
                }
            }
        }
        assert_eq!(store.count_unused_questions().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_count_has_no_side_effects() {
        let store = create_memory_store();
        seed(&store);
        let service = AllocationService::new(store.clone(), SharedRng::seeded(3));

        let err = service.allocate_raw(5, Requester::new("dave")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidImageCount(5)));
        assert_eq!(store.count_unused_questions().unwrap(), 2);
    }
}
