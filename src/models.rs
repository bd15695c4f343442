//! Core data structures for the quiz pipeline
//!
//! Rows of the relational model (keywords, images, image sets, questions)
//! plus the value types exchanged between the allocation service and its
//! callers.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Smallest number of images an image set may hold
pub const MIN_SET_SIZE: usize = 1;

/// Largest number of images an image set may hold
pub const MAX_SET_SIZE: usize = 3;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Identifier of a [`Keyword`] row
    KeywordId
);
row_id!(
    /// Identifier of an [`Image`] row
    ImageId
);
row_id!(
    /// Identifier of an [`ImageSet`] row
    ImageSetId
);
row_id!(
    /// Identifier of a [`Question`] row
    QuestionId
);

/// A search term, tagged with the category it was crawled for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: KeywordId,
    pub text: String,
    pub category: String,
}

/// A distinct crawled image URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub url: String,
}

/// A group of 1 to 3 images that questions are generated about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub id: ImageSetId,
    /// Members in insertion order
    pub image_ids: Vec<ImageId>,
    pub created_at: DateTime<Utc>,
}

impl ImageSet {
    /// Number of member images
    pub fn len(&self) -> usize {
        self.image_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_ids.is_empty()
    }
}

/// A generated question bundle for one image set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub image_set_id: ImageSetId,
    pub questions: Vec<String>,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub used_by: Option<String>,
}

impl Question {
    /// Whether a requester has already claimed this bundle
    pub fn is_used(&self) -> bool {
        self.used_by.is_some()
    }
}

/// A question bundle that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewQuestion {
    pub image_set_id: ImageSetId,
    pub questions: Vec<String>,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

/// One `{keyword, image_url}` row of an allocation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub keyword: String,
    pub image_url: String,
}

/// A bundle marked as used, with its image rows read in the same transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedQuestion {
    pub question: Question,
    pub image_info: Vec<ImageInfo>,
}

/// The payload handed to a requester after a successful claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub image_info: Vec<ImageInfo>,
    pub questions: Vec<String>,
}

/// Outcome of an allocation request
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    /// A question was claimed for the requester
    Claimed {
        question_id: QuestionId,
        image_count: usize,
        view: QuestionView,
    },
    /// No unused question matched the requested image count
    NotAvailable { image_count: usize },
}

impl Allocation {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed { .. })
    }

    /// The view of the claimed question, if any
    pub fn into_view(self) -> Option<QuestionView> {
        match self {
            Self::Claimed { view, .. } => Some(view),
            Self::NotAvailable { .. } => None,
        }
    }
}

/// Requested number of images per set
///
/// `Any` means the caller has no preference; it is resolved to a uniformly
/// random size before the store is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageCount {
    #[default]
    Any,
    One,
    Two,
    Three,
}

impl ImageCount {
    /// Resolve to a concrete set size in `1..=3`
    pub fn resolve<R: Rng + ?Sized>(self, rng: &mut R) -> usize {
        match self {
            Self::Any => rng.gen_range(MIN_SET_SIZE..=MAX_SET_SIZE),
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

impl TryFrom<i64> for ImageCount {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Any),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(Error::InvalidImageCount(other)),
        }
    }
}

/// Identity of the caller claiming a question
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Requester(pub String);

impl Requester {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Row counts across the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub keywords: usize,
    pub images: usize,
    pub image_sets: usize,
    pub questions: usize,
    pub unused_questions: usize,
}
