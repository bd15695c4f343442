//! Injectable random source
//!
//! Services draw from a [`SharedRng`] instead of the thread-local generator,
//! so tests can seed it and assert exact outcomes. Production code seeds it
//! from OS entropy.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};

/// Cloneable handle to a seedable random generator
#[derive(Debug, Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<ChaCha8Rng>>,
}

impl SharedRng {
    /// Generator seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self::from_rng(ChaCha8Rng::from_entropy())
    }

    /// Deterministic generator for tests and reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    fn from_rng(rng: ChaCha8Rng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rng)),
        }
    }

    /// Derive an independent generator
    ///
    /// The child is owned by the caller, so it can move into a blocking task
    /// without holding the shared lock.
    pub fn fork(&self) -> ChaCha8Rng {
        let seed = {
            let mut rng = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.next_u64()
        };
        ChaCha8Rng::seed_from_u64(seed)
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}
