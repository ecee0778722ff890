//! Content-addressed result cache on SQLite.
//!
//! Rows are keyed by the SHA-256 of the image bytes; the display name is a
//! non-unique secondary key. Part and fracture results arrive in separate
//! calls and must land on the same row.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::preprocess::ContentKey;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS image_predictions (
        content_key TEXT PRIMARY KEY NOT NULL,
        display_name TEXT NOT NULL,
        part_result TEXT,
        fracture_result TEXT,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_display_name ON image_predictions(display_name);
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub content_key: ContentKey,
    pub display_name: String,
    pub part_result: Option<String>,
    pub fracture_result: Option<String>,
}

/// Persistence seam for classification results.
pub trait ResultStore: Send + Sync {
    /// Exact content match when a key is given; display name otherwise.
    fn lookup(
        &self,
        content_key: Option<&ContentKey>,
        display_name: Option<&str>,
    ) -> Result<Option<CacheRecord>>;

    /// Atomically updates the row for this content (or, failing that, this
    /// name) with the supplied fields, or inserts a new row.
    fn upsert(
        &self,
        display_name: &str,
        content_key: &ContentKey,
        part_result: Option<&str>,
        fracture_result: Option<&str>,
    ) -> Result<()>;
}

pub struct ResultCache {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache").finish_non_exhaustive()
    }
}

impl ResultCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!(path = %path.display(), "result cache opened");
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM image_predictions", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRecord> {
    Ok(CacheRecord {
        content_key: ContentKey::from(row.get::<_, String>(0)?),
        display_name: row.get(1)?,
        part_result: row.get(2)?,
        fracture_result: row.get(3)?,
    })
}

impl ResultStore for ResultCache {
    fn lookup(
        &self,
        content_key: Option<&ContentKey>,
        display_name: Option<&str>,
    ) -> Result<Option<CacheRecord>> {
        let conn = self.lock();
        let record = match (content_key, display_name) {
            (Some(key), _) => conn
                .query_row(
                    "SELECT content_key, display_name, part_result, fracture_result
                     FROM image_predictions WHERE content_key = ?1",
                    params![key.as_str()],
                    read_record,
                )
                .optional()?,
            (None, Some(name)) => conn
                .query_row(
                    "SELECT content_key, display_name, part_result, fracture_result
                     FROM image_predictions WHERE display_name = ?1
                     ORDER BY updated_at DESC LIMIT 1",
                    params![name],
                    read_record,
                )
                .optional()?,
            (None, None) => None,
        };
        Ok(record)
    }

    fn upsert(
        &self,
        display_name: &str,
        content_key: &ContentKey,
        part_result: Option<&str>,
        fracture_result: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut existing: Option<String> = tx
            .query_row(
                "SELECT content_key FROM image_predictions WHERE content_key = ?1",
                params![content_key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_none() {
            existing = tx
                .query_row(
                    "SELECT content_key FROM image_predictions WHERE display_name = ?1
                     ORDER BY updated_at DESC LIMIT 1",
                    params![display_name],
                    |row| row.get(0),
                )
                .optional()?;
        }

        match existing {
            Some(row_key) => {
                tx.execute(
                    "UPDATE image_predictions
                     SET content_key = ?1,
                         display_name = ?2,
                         part_result = COALESCE(?3, part_result),
                         fracture_result = COALESCE(?4, fracture_result),
                         updated_at = ?5
                     WHERE content_key = ?6",
                    params![
                        content_key.as_str(),
                        display_name,
                        part_result,
                        fracture_result,
                        now,
                        row_key
                    ],
                )?;
                debug!(%content_key, adopted = row_key != content_key.as_str(), "cache row updated");
            }
            None => {
                tx.execute(
                    "INSERT INTO image_predictions
                     (content_key, display_name, part_result, fracture_result, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![content_key.as_str(), display_name, part_result, fracture_result, now],
                )?;
                debug!(%content_key, "cache row inserted");
            }
        }
        tx.commit()?;
        Ok(())
    }
}
