//! Store abstraction for the quiz pipeline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Business Logic                          │
//! │     (ingest, partition, generation, allocation)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      QuizStore trait                        │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                       │
//!                    ▼                       ▼
//!          ┌─────────────────┐     ┌─────────────────┐
//!          │     SQLite      │     │    In-memory    │
//!          │  Implementation │     │  Implementation │
//!          └─────────────────┘     └─────────────────┘
//! ```
//!
//! Every multi-row write is all-or-nothing. Implementations must make
//! [`QuizStore::claim_question`] indivisible: two concurrent callers can never
//! claim the same question.

use chrono::{DateTime, Utc};
use rand::RngCore;

use super::StoreError;
use crate::models::{
    ClaimedQuestion, Image, ImageId, ImageInfo, ImageSet, ImageSetId, Keyword, KeywordId,
    NewQuestion, Question, QuestionId, Requester, StoreStats,
};

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence operations needed by the pipeline
pub trait QuizStore: Send + Sync {
    // ------------------------------------------------------------------
    // Image pool
    // ------------------------------------------------------------------

    /// Return the keyword with this text, creating it for `category` on
    /// first sighting. Existing keywords are returned unchanged.
    fn upsert_keyword(&self, text: &str, category: &str) -> StoreResult<Keyword>;

    /// Look up an image by URL
    fn find_image(&self, url: &str) -> StoreResult<Option<Image>>;

    /// Insert the URLs that are not yet known and map each new image to
    /// `keyword_id`, in one transaction. Already-known URLs are skipped
    /// (not re-mapped). Returns the newly created images.
    fn insert_new_images(&self, keyword_id: KeywordId, urls: &[String]) -> StoreResult<Vec<Image>>;

    /// Map an existing image to a keyword. Returns `false` if the pair was
    /// already mapped.
    fn link_keyword_image(&self, keyword_id: KeywordId, image_id: ImageId) -> StoreResult<bool>;

    /// Distinct image ids reachable from any keyword of `category`
    fn category_pool(&self, category: &str) -> StoreResult<Vec<ImageId>>;

    // ------------------------------------------------------------------
    // Image sets
    // ------------------------------------------------------------------

    /// Persist one partition run. Either every set is created or none is.
    fn create_image_sets(
        &self,
        sets: &[Vec<ImageId>],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ImageSetId>>;

    /// Load an image set with members in insertion order
    fn get_image_set(&self, id: ImageSetId) -> StoreResult<Option<ImageSet>>;

    /// Image sets with no question bundle, ordered by id
    fn unmapped_image_set_ids(&self) -> StoreResult<Vec<ImageSetId>>;

    /// Member URLs of a set in insertion order
    fn image_set_urls(&self, id: ImageSetId) -> StoreResult<Vec<String>>;

    // ------------------------------------------------------------------
    // Questions
    // ------------------------------------------------------------------

    /// Persist a batch of question bundles in one transaction
    fn insert_questions(&self, questions: &[NewQuestion]) -> StoreResult<Vec<QuestionId>>;

    /// Load a question bundle
    fn get_question(&self, id: QuestionId) -> StoreResult<Option<Question>>;

    /// Number of bundles nobody has claimed yet
    fn count_unused_questions(&self) -> StoreResult<usize>;

    /// Atomically pick one unused bundle whose image set has exactly
    /// `image_count` members (uniformly at random via `rng`), mark it as used
    /// by `requester` and return the updated row with its image rows. The
    /// image rows are read inside the claim, so a failure there leaves the
    /// bundle unused. `None` when nothing matches.
    fn claim_question(
        &self,
        image_count: usize,
        requester: &Requester,
        now: DateTime<Utc>,
        rng: &mut dyn RngCore,
    ) -> StoreResult<Option<ClaimedQuestion>>;

    /// One `{keyword, image_url}` row per keyword mapping of every member of
    /// the set, in set insertion order then keyword id
    fn image_info(&self, set_id: ImageSetId) -> StoreResult<Vec<ImageInfo>>;

    /// Row counts
    fn stats(&self) -> StoreResult<StoreStats>;
}

/// Check the invariants of one partition run before writing it
pub(crate) fn validate_partition(sets: &[Vec<ImageId>]) -> StoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for set in sets {
        if !(crate::models::MIN_SET_SIZE..=crate::models::MAX_SET_SIZE).contains(&set.len()) {
            return Err(StoreError::InvalidSetSize { size: set.len() });
        }
        for image_id in set {
            if !seen.insert(*image_id) {
                return Err(StoreError::DuplicateImage(*image_id));
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
