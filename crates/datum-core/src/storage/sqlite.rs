//! SQLite document store
//!
//! Persists each document as a JSON body in the `documents` table. The
//! human id is copied out of `meta.humanId` on every write into its own
//! indexed column, which backs the human-id prefix scan.
//!
//! Each operation runs inside one SQLite transaction, so the revision check
//! and the write it guards are atomic against other connections.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::schema::{init_schema, needs_init};
use super::{prefix_upper_bound, DocumentStore, HumanIdEntry, StoreError, StoreResult};
use crate::document::{DocBody, Document, Revision};

/// Persistent document store backed by SQLite
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Row state of one id
struct Row {
    rev: Revision,
    body: Option<String>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        if needs_init(&conn) {
            debug!("Initializing document store schema");
            init_schema(&conn)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of live documents
    pub fn count(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE deleted = 0",
            [],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn load_row(conn: &Connection, id: &str) -> StoreResult<Option<Row>> {
    conn.query_row(
        "SELECT rev, body FROM documents WHERE id = ?",
        params![id],
        |row| {
            Ok(Row {
                rev: Revision::from(row.get::<_, String>(0)?),
                body: row.get(1)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, id: &str) -> StoreResult<Document> {
        let conn = self.lock()?;
        match load_row(&conn, id)? {
            Some(Row {
                rev,
                body: Some(body),
            }) => {
                let value = serde_json::from_str(&body)?;
                let body = DocBody::from_value(value).map_err(|e| StoreError::CorruptDocument {
                    id: id.to_string(),
                    details: e.to_string(),
                })?;
                Ok(Document {
                    id: id.to_string(),
                    rev,
                    body,
                })
            }
            row => Err(StoreError::NotFound {
                id: id.to_string(),
                deleted: row.is_some(),
            }),
        }
    }

    async fn put(
        &self,
        id: &str,
        expected: Option<&Revision>,
        body: &DocBody,
    ) -> StoreResult<Revision> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rev = match (load_row(&tx, id)?, expected) {
            (None, None) => Revision::with_generation(1),
            (Some(row), None) if row.body.is_none() => row.rev.next(),
            (Some(row), Some(rev)) if row.body.is_some() && &row.rev == rev => row.rev.next(),
            _ => return Err(StoreError::Conflict { id: id.to_string() }),
        };

        tx.execute(
            r#"
            INSERT INTO documents (id, rev, generation, body, deleted, human_id)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            ON CONFLICT(id) DO UPDATE SET
                rev = excluded.rev,
                generation = excluded.generation,
                body = excluded.body,
                deleted = 0,
                human_id = excluded.human_id
            "#,
            params![
                id,
                rev.as_str(),
                rev.generation() as i64,
                serde_json::to_string(&body.to_value())?,
                body.human_id(),
            ],
        )?;
        tx.commit()?;
        Ok(rev)
    }

    async fn delete(&self, id: &str, rev: &Revision) -> StoreResult<Revision> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let next = match load_row(&tx, id)? {
            Some(row) if row.body.is_some() && &row.rev == rev => row.rev.next(),
            Some(row) if row.body.is_some() => {
                return Err(StoreError::Conflict { id: id.to_string() })
            }
            row => {
                return Err(StoreError::NotFound {
                    id: id.to_string(),
                    deleted: row.is_some(),
                })
            }
        };

        tx.execute(
            "UPDATE documents SET rev = ?2, generation = ?3, body = NULL, deleted = 1, human_id = NULL WHERE id = ?1",
            params![id, next.as_str(), next.generation() as i64],
        )?;
        tx.commit()?;
        Ok(next)
    }

    async fn scan_ids(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id FROM documents
            WHERE id >= ?1 AND (?2 IS NULL OR id < ?2) AND deleted = 0
            ORDER BY id
            "#,
        )?;
        let ids = stmt
            .query_map(params![prefix, prefix_upper_bound(prefix)], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    async fn scan_human_ids(&self, prefix: &str) -> StoreResult<Vec<HumanIdEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT human_id, id FROM documents
            WHERE human_id >= ?1 AND (?2 IS NULL OR human_id < ?2) AND deleted = 0
            ORDER BY human_id, id
            "#,
        )?;
        let entries = stmt
            .query_map(params![prefix, prefix_upper_bound(prefix)], |row| {
                Ok(HumanIdEntry {
                    human_id: row.get(0)?,
                    id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Meta, Object};
    use serde_json::json;
    use tempfile::TempDir;

    fn structured(human_id: &str, value: i64) -> DocBody {
        DocBody::Structured {
            data: json!({"value": value}).as_object().cloned().unwrap(),
            meta: Meta {
                human_id: Some(human_id.to_string()),
                ..Meta::default()
            },
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let body = structured("h1", 1);

        let rev = store.put("doc", None, &body).await.unwrap();
        let doc = store.get("doc").await.unwrap();

        assert_eq!(doc.rev, rev);
        assert_eq!(doc.body, body);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let body = DocBody::Flat(Object::new());

        let rev1 = store.put("doc", None, &body).await.unwrap();
        assert!(store.put("doc", None, &body).await.unwrap_err().is_conflict());

        let rev2 = store.put("doc", Some(&rev1), &body).await.unwrap();
        assert!(store
            .put("doc", Some(&rev1), &body)
            .await
            .unwrap_err()
            .is_conflict());
        assert!(store.delete("doc", &rev1).await.unwrap_err().is_conflict());

        store.delete("doc", &rev2).await.unwrap();
    }

    #[tokio::test]
    async fn test_tombstone_and_recreate() {
        let store = SqliteStore::open_in_memory().unwrap();
        let body = structured("h1", 1);

        let rev = store.put("doc", None, &body).await.unwrap();
        let tomb = store.delete("doc", &rev).await.unwrap();
        assert_eq!(tomb.generation(), 2);

        assert!(matches!(
            store.get("doc").await.unwrap_err(),
            StoreError::NotFound { deleted: true, .. }
        ));
        assert!(matches!(
            store.get("other").await.unwrap_err(),
            StoreError::NotFound { deleted: false, .. }
        ));
        assert!(store.scan_human_ids("h").await.unwrap().is_empty());

        let rev = store.put("doc", None, &body).await.unwrap();
        assert_eq!(rev.generation(), 3);
    }

    #[tokio::test]
    async fn test_prefix_scans() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("word_de", None, &structured("abc", 1)).await.unwrap();
        store.put("word_en", None, &structured("abd", 2)).await.unwrap();
        store.put("other", None, &structured("xyz", 3)).await.unwrap();

        assert_eq!(
            store.scan_ids("word_").await.unwrap(),
            vec!["word_de".to_string(), "word_en".to_string()]
        );
        assert_eq!(
            store.scan_human_ids("ab").await.unwrap(),
            vec![
                HumanIdEntry {
                    human_id: "abc".into(),
                    id: "word_de".into()
                },
                HumanIdEntry {
                    human_id: "abd".into(),
                    id: "word_en".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_prefix_scans_include_astral_characters() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("ab\u{1F600}", None, &structured("hi\u{1F600}", 1)).await.unwrap();
        store.put("ab\u{FFFF}", None, &structured("hj", 2)).await.unwrap();
        store.put("ac", None, &structured("hk", 3)).await.unwrap();

        assert_eq!(
            store.scan_ids("ab").await.unwrap(),
            vec!["ab\u{FFFF}".to_string(), "ab\u{1F600}".to_string()]
        );
        assert_eq!(store.scan_ids("").await.unwrap().len(), 3);

        let entries = store.scan_human_ids("hi").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "ab\u{1F600}");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("datum.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("kept", None, &structured("h", 7)).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let doc = store.get("kept").await.unwrap();
        assert_eq!(doc.body.data().get("value"), Some(&json!(7)));
    }
}
