//! Randomized partitioning of a category's image pool into image sets
//!
//! The partition is a greedy random draw, not an optimization: set sizes are
//! drawn uniformly from what the remaining pool allows, members are sampled
//! without replacement, and the number of sets is not fixed in advance.
//!
//! [`plan_partition`] is the pure algorithm. [`SetPartitioner`] loads the
//! pool from the store, plans, and writes the whole run in one transaction.

use chrono::Utc;
use rand::Rng;

use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{ImageId, ImageSet, MAX_SET_SIZE, MIN_SET_SIZE};
use crate::random::SharedRng;
use crate::storage::{run_blocking, SharedQuizStore};

/// Split `pool` into sets of 1 to 3 images
///
/// Every id ends up in exactly one set. With three or more images left the
/// next size is drawn from {1, 2, 3}; with two left from {1, 2}; with one
/// left it is 1.
pub fn plan_partition<R: Rng + ?Sized>(pool: Vec<ImageId>, rng: &mut R) -> Vec<Vec<ImageId>> {
    let mut remaining = pool;
    let mut sets = Vec::new();

    while !remaining.is_empty() {
        let upper = remaining.len().min(MAX_SET_SIZE);
        let size = rng.gen_range(MIN_SET_SIZE..=upper);

        let mut set = Vec::with_capacity(size);
        for _ in 0..size {
            let idx = rng.gen_range(0..remaining.len());
            set.push(remaining.swap_remove(idx));
        }
        sets.push(set);
    }

    sets
}

/// Count of sets per size; index 0 is size 1
pub fn size_distribution(sets: &[Vec<ImageId>]) -> [usize; MAX_SET_SIZE] {
    let mut counts = [0; MAX_SET_SIZE];
    for set in sets {
        if let Some(slot) = set.len().checked_sub(1).and_then(|i| counts.get_mut(i)) {
            *slot += 1;
        }
    }
    counts
}

/// Partitions a category's pool and persists the resulting sets
#[derive(Clone)]
pub struct SetPartitioner {
    store: SharedQuizStore,
    rng: SharedRng,
}

impl SetPartitioner {
    pub fn new(store: SharedQuizStore, rng: SharedRng) -> Self {
        Self { store, rng }
    }

    /// Partition every image reachable from keywords of `category`
    ///
    /// An empty pool is a no-op and returns no sets. A store failure rolls
    /// the whole run back.
    pub async fn partition(&self, category: &str) -> Result<Vec<ImageSet>> {
        let category = category.trim().to_string();
        if category.is_empty() {
            return Err(Error::validation("category must not be empty"));
        }

        let pool = {
            let category = category.clone();
            run_blocking(&self.store, move |s| s.category_pool(&category)).await?
        };

        if pool.is_empty() {
            tracing::info!(category = %category, "No images in pool, nothing to partition");
            return Ok(Vec::new());
        }

        let image_count = pool.len();
        let mut rng = self.rng.fork();
        let plan = plan_partition(pool, &mut rng);
        let created_at = Utc::now();

        let ids = {
            let plan = plan.clone();
            run_blocking(&self.store, move |s| s.create_image_sets(&plan, created_at)).await?
        };

        let [ones, twos, threes] = size_distribution(&plan);
        tracing::info!(
            category = %category,
            images = image_count,
            sets = ids.len(),
            size_1 = ones,
            size_2 = twos,
            size_3 = threes,
            "Partitioned image pool"
        );
        metrics::record_image_sets(&plan.iter().map(Vec::len).collect::<Vec<_>>());

        Ok(ids
            .into_iter()
            .zip(plan)
            .map(|(id, image_ids)| ImageSet {
                id,
                image_ids,
                created_at,
            })
            .collect())
    }
}
