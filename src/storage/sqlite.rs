//! SQLite implementation of [`QuizStore`]
//!
//! A single connection behind a `Mutex`. Multi-row writes run in
//! transactions; claims use `BEGIN IMMEDIATE` so that other processes
//! sharing the database file are serialized too.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::RngCore;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::repository::{validate_partition, QuizStore, StoreResult};
use super::StoreError;
use crate::models::{
    ClaimedQuestion, Image, ImageId, ImageInfo, ImageSet, ImageSetId, Keyword, KeywordId,
    NewQuestion, Question, QuestionId, Requester, StoreStats,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const QUESTION_COLUMNS: &str =
    "id, image_set_id, questions, cost, created_at, updated_at, used_by";

/// SQLite-backed store
pub struct SqliteQuizStore {
    conn: Mutex<Connection>,
}

impl SqliteQuizStore {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Private in-memory database
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS keywords (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    text TEXT NOT NULL UNIQUE,
                    category TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_keywords_category
                    ON keywords(category);

                CREATE TABLE IF NOT EXISTS images (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    url TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS keyword_image_mapping (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    keyword_id INTEGER NOT NULL REFERENCES keywords(id),
                    image_id INTEGER NOT NULL REFERENCES images(id),
                    UNIQUE (keyword_id, image_id)
                );

                CREATE INDEX IF NOT EXISTS idx_keyword_image_mapping_image
                    ON keyword_image_mapping(image_id);

                CREATE TABLE IF NOT EXISTS image_sets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS image_set_mapping (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    image_set_id INTEGER NOT NULL REFERENCES image_sets(id),
                    image_id INTEGER NOT NULL REFERENCES images(id),
                    UNIQUE (image_set_id, image_id)
                );

                CREATE TABLE IF NOT EXISTS questions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    image_set_id INTEGER NOT NULL REFERENCES image_sets(id),
                    questions TEXT NOT NULL,
                    cost REAL NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    used_by TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_questions_image_set
                    ON questions(image_set_id);

                CREATE INDEX IF NOT EXISTS idx_questions_unused
                    ON questions(used_by) WHERE used_by IS NULL;
                "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_question(row: &Row<'_>) -> rusqlite::Result<Question> {
    let questions: String = row.get(2)?;
    let questions: Vec<String> = serde_json::from_str(&questions)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(Question {
        id: QuestionId(row.get(0)?),
        image_set_id: ImageSetId(row.get(1)?),
        questions,
        cost: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
        updated_at: parse_timestamp(5, &updated_at)?,
        used_by: row.get(6)?,
    })
}

/// One row per keyword mapping of each member, in set insertion order
fn load_image_info(conn: &Connection, set_id: ImageSetId) -> StoreResult<Vec<ImageInfo>> {
    let mut stmt = conn.prepare(
        "SELECT k.text, i.url
         FROM image_set_mapping m
         JOIN images i ON i.id = m.image_id
         JOIN keyword_image_mapping kim ON kim.image_id = m.image_id
         JOIN keywords k ON k.id = kim.keyword_id
         WHERE m.image_set_id = ?1
         ORDER BY m.id, k.id",
    )?;
    let info = stmt
        .query_map(params![set_id.0], |row| {
            Ok(ImageInfo {
                keyword: row.get(0)?,
                image_url: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(info)
}

fn count(conn: &Connection, sql: &str) -> StoreResult<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

impl QuizStore for SqliteQuizStore {
    fn upsert_keyword(&self, text: &str, category: &str) -> StoreResult<Keyword> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO keywords (text, category) VALUES (?1, ?2)",
            params![text, category],
        )?;
        let keyword = conn.query_row(
            "SELECT id, text, category FROM keywords WHERE text = ?1",
            params![text],
            |row| {
                Ok(Keyword {
                    id: KeywordId(row.get(0)?),
                    text: row.get(1)?,
                    category: row.get(2)?,
                })
            },
        )?;
        Ok(keyword)
    }

    fn find_image(&self, url: &str) -> StoreResult<Option<Image>> {
        let conn = self.conn()?;
        let image = conn
            .query_row(
                "SELECT id, url FROM images WHERE url = ?1",
                params![url],
                |row| {
                    Ok(Image {
                        id: ImageId(row.get(0)?),
                        url: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(image)
    }

    fn insert_new_images(&self, keyword_id: KeywordId, urls: &[String]) -> StoreResult<Vec<Image>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::new();

        for url in urls {
            let changed = tx.execute(
                "INSERT OR IGNORE INTO images (url) VALUES (?1)",
                params![url],
            )?;
            if changed == 0 {
                continue;
            }
            let image_id = ImageId(tx.last_insert_rowid());
            tx.execute(
                "INSERT OR IGNORE INTO keyword_image_mapping (keyword_id, image_id) VALUES (?1, ?2)",
                params![keyword_id.0, image_id.0],
            )?;
            inserted.push(Image {
                id: image_id,
                url: url.clone(),
            });
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn link_keyword_image(&self, keyword_id: KeywordId, image_id: ImageId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO keyword_image_mapping (keyword_id, image_id) VALUES (?1, ?2)",
            params![keyword_id.0, image_id.0],
        )?;
        Ok(changed > 0)
    }

    fn category_pool(&self, category: &str) -> StoreResult<Vec<ImageId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT kim.image_id
             FROM keyword_image_mapping kim
             JOIN keywords k ON k.id = kim.keyword_id
             WHERE k.category = ?1
             ORDER BY kim.image_id",
        )?;
        let ids = stmt
            .query_map(params![category], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(ImageId))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn create_image_sets(
        &self,
        sets: &[Vec<ImageId>],
        created_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ImageSetId>> {
        validate_partition(sets)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let created_at = created_at.to_rfc3339();
        let mut ids = Vec::with_capacity(sets.len());

        for set in sets {
            tx.execute(
                "INSERT INTO image_sets (created_at) VALUES (?1)",
                params![created_at],
            )?;
            let set_id = tx.last_insert_rowid();
            for image_id in set {
                tx.execute(
                    "INSERT INTO image_set_mapping (image_set_id, image_id) VALUES (?1, ?2)",
                    params![set_id, image_id.0],
                )?;
            }
            ids.push(ImageSetId(set_id));
        }

        tx.commit()?;
        Ok(ids)
    }

    fn get_image_set(&self, id: ImageSetId) -> StoreResult<Option<ImageSet>> {
        let conn = self.conn()?;
        let created_at: Option<String> = conn
            .query_row(
                "SELECT created_at FROM image_sets WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        let Some(created_at) = created_at else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT image_id FROM image_set_mapping WHERE image_set_id = ?1 ORDER BY id",
        )?;
        let image_ids = stmt
            .query_map(params![id.0], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(ImageId))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(ImageSet {
            id,
            image_ids,
            created_at: parse_timestamp(0, &created_at)?,
        }))
    }

    fn unmapped_image_set_ids(&self) -> StoreResult<Vec<ImageSetId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id FROM image_sets s
             WHERE NOT EXISTS (SELECT 1 FROM questions q WHERE q.image_set_id = s.id)
             ORDER BY s.id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(ImageSetId))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn image_set_urls(&self, id: ImageSetId) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT i.url FROM image_set_mapping m
             JOIN images i ON i.id = m.image_id
             WHERE m.image_set_id = ?1
             ORDER BY m.id",
        )?;
        let urls = stmt
            .query_map(params![id.0], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(urls)
    }

    fn insert_questions(&self, questions: &[NewQuestion]) -> StoreResult<Vec<QuestionId>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(questions.len());

        for question in questions {
            let encoded = serde_json::to_string(&question.questions)?;
            let created_at = question.created_at.to_rfc3339();
            tx.execute(
                "INSERT INTO questions (image_set_id, questions, cost, created_at, updated_at, used_by)
                 VALUES (?1, ?2, ?3, ?4, ?4, NULL)",
                params![question.image_set_id.0, encoded, question.cost, created_at],
            )?;
            ids.push(QuestionId(tx.last_insert_rowid()));
        }

        tx.commit()?;
        Ok(ids)
    }

    fn get_question(&self, id: QuestionId) -> StoreResult<Option<Question>> {
        let conn = self.conn()?;
        let question = conn
            .query_row(
                &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1"),
                params![id.0],
                map_question,
            )
            .optional()?;
        Ok(question)
    }

    fn count_unused_questions(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        count(&conn, "SELECT COUNT(*) FROM questions WHERE used_by IS NULL")
    }

    fn claim_question(
        &self,
        image_count: usize,
        requester: &Requester,
        now: DateTime<Utc>,
        rng: &mut dyn RngCore,
    ) -> StoreResult<Option<ClaimedQuestion>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidates = {
            let mut stmt = tx.prepare(
                "SELECT q.id FROM questions q
                 JOIN (
                     SELECT image_set_id, COUNT(*) AS members
                     FROM image_set_mapping
                     GROUP BY image_set_id
                 ) m ON m.image_set_id = q.image_set_id
                 WHERE q.used_by IS NULL AND m.members = ?1
                 ORDER BY q.id",
            )?;
            let ids = stmt
                .query_map(params![image_count as i64], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        let Some(&chosen) = candidates.choose(rng) else {
            return Ok(None);
        };

        let claimed = tx
            .query_row(
                &format!(
                    "UPDATE questions SET used_by = ?1, updated_at = ?2
                     WHERE id = ?3 AND used_by IS NULL
                     RETURNING {QUESTION_COLUMNS}"
                ),
                params![requester.as_str(), now.to_rfc3339(), chosen],
                map_question,
            )
            .optional()?;

        // Dropping `tx` on an error below rolls the claim back
        let claimed = match claimed {
            Some(question) => {
                let image_info = load_image_info(&tx, question.image_set_id)?;
                Some(ClaimedQuestion {
                    question,
                    image_info,
                })
            }
            None => None,
        };

        tx.commit()?;
        Ok(claimed)
    }

    fn image_info(&self, set_id: ImageSetId) -> StoreResult<Vec<ImageInfo>> {
        let conn = self.conn()?;
        load_image_info(&conn, set_id)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.conn()?;
        Ok(StoreStats {
            keywords: count(&conn, "SELECT COUNT(*) FROM keywords")?,
            images: count(&conn, "SELECT COUNT(*) FROM images")?,
            image_sets: count(&conn, "SELECT COUNT(*) FROM image_sets")?,
            questions: count(&conn, "SELECT COUNT(*) FROM questions")?,
            unused_questions: count(
                &conn,
                "SELECT COUNT(*) FROM questions WHERE used_by IS NULL",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::contract;
    use tempfile::TempDir;

    #[test]
    fn test_contract_in_memory() {
        contract::run_all(|| Box::new(SqliteQuizStore::in_memory().unwrap()));
    }

    #[test]
    fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("quiz.db");

        {
            let store = SqliteQuizStore::new(&path).unwrap();
            store.upsert_keyword("cat", "animal").unwrap();
        }

        let store = SqliteQuizStore::new(&path).unwrap();
        assert_eq!(store.stats().unwrap().keywords, 1);
    }

    #[test]
    fn test_failed_image_lookup_rolls_back_claim() {
        let store = SqliteQuizStore::in_memory().unwrap();
        let ids = contract::seed_pool(&store, "animal", 1);
        let sets = store.create_image_sets(&[ids], Utc::now()).unwrap();
        let qids = store
            .insert_questions(&[contract::new_question(sets[0])])
            .unwrap();

        store
            .conn()
            .unwrap()
            .execute_batch("DROP TABLE keyword_image_mapping")
            .unwrap();

        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let result = store.claim_question(1, &Requester::new("alice"), Utc::now(), &mut rng);
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert_eq!(store.count_unused_questions().unwrap(), 1);
        assert!(!store.get_question(qids[0]).unwrap().unwrap().is_used());
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let store = SqliteQuizStore::in_memory().unwrap();
        let err = store.link_keyword_image(KeywordId(1), ImageId(1));
        assert!(matches!(err, Err(StoreError::Sqlite(_))));
    }
}
