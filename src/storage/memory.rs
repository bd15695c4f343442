//! In-memory implementation of [`QuizStore`]
//!
//! Useful for testing and dry runs without a database. All tables sit behind
//! one `RwLock`, so every write is trivially atomic.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::RngCore;

use super::repository::{validate_partition, QuizStore, StoreResult};
use super::StoreError;
use crate::models::{
    ClaimedQuestion, Image, ImageId, ImageInfo, ImageSet, ImageSetId, Keyword, KeywordId,
    NewQuestion, Question, QuestionId, Requester, StoreStats,
};

#[derive(Default)]
struct Tables {
    keywords: Vec<Keyword>,
    images: Vec<Image>,
    image_by_url: HashMap<String, ImageId>,
    /// (keyword, image) edges; ordered so lookups come out by keyword id
    keyword_images: BTreeSet<(KeywordId, ImageId)>,
    image_sets: Vec<ImageSet>,
    questions: Vec<Question>,
}

impl Tables {
    fn next_id(len: usize) -> i64 {
        len as i64 + 1
    }

    fn image(&self, id: ImageId) -> Option<&Image> {
        self.images.get((id.0 - 1) as usize)
    }

    fn image_set(&self, id: ImageSetId) -> Option<&ImageSet> {
        self.image_sets.iter().find(|s| s.id == id)
    }

    fn keywords_of(&self, image_id: ImageId) -> impl Iterator<Item = KeywordId> + '_ {
        self.keyword_images
            .iter()
            .filter(move |(_, img)| *img == image_id)
            .map(|(kw, _)| *kw)
    }

    fn image_info(&self, set_id: ImageSetId) -> Vec<ImageInfo> {
        let Some(set) = self.image_set(set_id) else {
            return Vec::new();
        };

        let mut info = Vec::new();
        for image_id in &set.image_ids {
            let Some(image) = self.image(*image_id) else {
                continue;
            };
            for keyword_id in self.keywords_of(*image_id) {
                if let Some(keyword) = self.keywords.iter().find(|k| k.id == keyword_id) {
                    info.push(ImageInfo {
                        keyword: keyword.text.clone(),
                        image_url: image.url.clone(),
                    });
                }
            }
        }
        info
    }
}

/// In-memory store
pub struct MemoryQuizStore {
    tables: RwLock<Tables>,
}

impl MemoryQuizStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryQuizStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizStore for MemoryQuizStore {
    fn upsert_keyword(&self, text: &str, category: &str) -> StoreResult<Keyword> {
        let mut tables = self.write()?;
        if let Some(existing) = tables.keywords.iter().find(|k| k.text == text) {
            return Ok(existing.clone());
        }
        let keyword = Keyword {
            id: KeywordId(Tables::next_id(tables.keywords.len())),
            text: text.to_string(),
            category: category.to_string(),
        };
        tables.keywords.push(keyword.clone());
        Ok(keyword)
    }

    fn find_image(&self, url: &str) -> StoreResult<Option<Image>> {
        let tables = self.read()?;
        Ok(tables
            .image_by_url
            .get(url)
            .and_then(|id| tables.image(*id))
            .cloned())
    }

    fn insert_new_images(&self, keyword_id: KeywordId, urls: &[String]) -> StoreResult<Vec<Image>> {
        let mut tables = self.write()?;
        if !tables.keywords.iter().any(|k| k.id == keyword_id) {
            return Err(StoreError::UnknownKeyword(keyword_id));
        }

        let mut inserted = Vec::new();
        for url in urls {
            if tables.image_by_url.contains_key(url) {
                continue;
            }
            let image = Image {
                id: ImageId(Tables::next_id(tables.images.len())),
                url: url.clone(),
            };
            tables.image_by_url.insert(url.clone(), image.id);
            tables.keyword_images.insert((keyword_id, image.id));
            tables.images.push(image.clone());
            inserted.push(image);
        }
        Ok(inserted)
    }

    fn link_keyword_image(&self, keyword_id: KeywordId, image_id: ImageId) -> StoreResult<bool> {
        let mut tables = self.write()?;
        if tables.image(image_id).is_none() {
            return Err(StoreError::UnknownImage(image_id));
        }
        if !tables.keywords.iter().any(|k| k.id == keyword_id) {
            return Err(StoreError::UnknownKeyword(keyword_id));
        }
        Ok(tables.keyword_images.insert((keyword_id, image_id)))
    }

    fn category_pool(&self, category: &str) -> StoreResult<Vec<ImageId>> {
        let tables = self.read()?;
        let keyword_ids: HashSet<KeywordId> = tables
            .keywords
            .iter()
            .filter(|k| k.category == category)
            .map(|k| k.id)
            .collect();
        let pool: BTreeSet<ImageId> = tables
            .keyword_images
            .iter()
            .filter(|(kw, _)| keyword_ids.contains(kw))
            .map(|(_, img)| *img)
            .collect();
        Ok(pool.into_iter().collect())
    }

    fn create_image_sets(
        &self,
        sets: &[Vec<ImageId>],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ImageSetId>> {
        validate_partition(sets)?;

        let mut tables = self.write()?;
        if let Some(missing) = sets
            .iter()
            .flatten()
            .find(|id| tables.image(**id).is_none())
        {
            return Err(StoreError::UnknownImage(*missing));
        }

        let mut ids = Vec::with_capacity(sets.len());
        for set in sets {
            let id = ImageSetId(Tables::next_id(tables.image_sets.len()));
            tables.image_sets.push(ImageSet {
                id,
                image_ids: set.clone(),
                created_at,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_image_set(&self, id: ImageSetId) -> StoreResult<Option<ImageSet>> {
        Ok(self.read()?.image_set(id).cloned())
    }

    fn unmapped_image_set_ids(&self) -> StoreResult<Vec<ImageSetId>> {
        let tables = self.read()?;
        let mapped: HashSet<ImageSetId> = tables.questions.iter().map(|q| q.image_set_id).collect();
        Ok(tables
            .image_sets
            .iter()
            .map(|s| s.id)
            .filter(|id| !mapped.contains(id))
            .collect())
    }

    fn image_set_urls(&self, id: ImageSetId) -> StoreResult<Vec<String>> {
        let tables = self.read()?;
        let Some(set) = tables.image_set(id) else {
            return Ok(Vec::new());
        };
        Ok(set
            .image_ids
            .iter()
            .filter_map(|img| tables.image(*img))
            .map(|img| img.url.clone())
            .collect())
    }

    fn insert_questions(&self, questions: &[NewQuestion]) -> StoreResult<Vec<QuestionId>> {
        let mut tables = self.write()?;
        if let Some(missing) = questions
            .iter()
            .find(|q| tables.image_set(q.image_set_id).is_none())
        {
            return Err(StoreError::UnknownImageSet(missing.image_set_id));
        }

        let mut ids = Vec::with_capacity(questions.len());
        for question in questions {
            let id = QuestionId(Tables::next_id(tables.questions.len()));
            tables.questions.push(Question {
                id,
                image_set_id: question.image_set_id,
                questions: question.questions.clone(),
                cost: question.cost,
                created_at: question.created_at,
                updated_at: question.created_at,
                used_by: None,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_question(&self, id: QuestionId) -> StoreResult<Option<Question>> {
        Ok(self.read()?.questions.iter().find(|q| q.id == id).cloned())
    }

    fn count_unused_questions(&self) -> StoreResult<usize> {
        Ok(self.read()?.questions.iter().filter(|q| !q.is_used()).count())
    }

    fn claim_question(
        &self,
        image_count: usize,
        requester: &Requester,
        now: DateTime<Utc>,
        rng: &mut dyn RngCore,
    ) -> StoreResult<Option<ClaimedQuestion>> {
        let mut tables = self.write()?;

        let candidates: Vec<usize> = tables
            .questions
            .iter()
            .enumerate()
            .filter(|(_, q)| !q.is_used())
            .filter(|(_, q)| {
                tables
                    .image_set(q.image_set_id)
                    .is_some_and(|s| s.len() == image_count)
            })
            .map(|(idx, _)| idx)
            .collect();

        let Some(&idx) = candidates.choose(rng) else {
            return Ok(None);
        };

        let image_info = tables.image_info(tables.questions[idx].image_set_id);
        let question = &mut tables.questions[idx];
        question.used_by = Some(requester.as_str().to_string());
        question.updated_at = now;
        Ok(Some(ClaimedQuestion {
            question: question.clone(),
            image_info,
        }))
    }

    fn image_info(&self, set_id: ImageSetId) -> StoreResult<Vec<ImageInfo>> {
        Ok(self.read()?.image_info(set_id))
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let tables = self.read()?;
        Ok(StoreStats {
            keywords: tables.keywords.len(),
            images: tables.images.len(),
            image_sets: tables.image_sets.len(),
            questions: tables.questions.len(),
            unused_questions: tables.questions.iter().filter(|q| !q.is_used()).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::contract;

    #[test]
    fn test_contract() {
        contract::run_all(|| Box::new(MemoryQuizStore::new()));
    }

    #[test]
    fn test_unknown_image_rejected() {
        let store = MemoryQuizStore::new();
        let err = store.create_image_sets(&[vec![ImageId(5)]], Utc::now());
        assert!(matches!(err, Err(StoreError::UnknownImage(ImageId(5)))));
    }
}
