use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::equipment::AnalysisResult;
use crate::{now_s, open_db_connection};

/// Status recorded for every stored analysis.
pub const STATUS_COMPLETED: &str = "completed";

/// One persisted analysis, keyed by image key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredAnalysis {
    pub image_key: String,
    pub result: AnalysisResult,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: String,
    pub image_sha256: String,
}

impl StoredAnalysis {
    pub fn completed(
        image_key: &str,
        result: AnalysisResult,
        image_sha256: String,
        created_at: u64,
        retention: Duration,
    ) -> Self {
        Self {
            image_key: image_key.to_string(),
            result,
            created_at,
            expires_at: created_at.saturating_add(retention.as_secs()),
            status: STATUS_COMPLETED.to_string(),
            image_sha256,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Analysis result store.
///
/// Writing a key that already exists replaces the previous analysis.
/// Expired analyses are never returned.
pub trait ResultStore: Send + Sync {
    fn put(&self, analysis: &StoredAnalysis) -> Result<()>;

    fn get(&self, image_key: &str) -> Result<Option<StoredAnalysis>>;

    /// Delete analyses that expired at or before `now`; returns how many.
    fn purge_expired(&self, now: u64) -> Result<usize>;
}

pub struct SqliteResultStore {
    conn: Mutex<Connection>,
}

impl SqliteResultStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS analyses (
              image_key TEXT PRIMARY KEY,
              result_json TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              expires_at INTEGER NOT NULL,
              status TEXT NOT NULL,
              image_sha256 TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analyses_expires ON analyses(expires_at);
            "#,
        )?;
        Ok(())
    }
}

fn to_sql_time(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", field))
}

fn from_sql_time(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("corrupt result store: negative {}", field))
}

impl ResultStore for SqliteResultStore {
    fn put(&self, analysis: &StoredAnalysis) -> Result<()> {
        let result_json = serde_json::to_string(&analysis.result)?;
        self.lock()?.execute(
            r#"
            INSERT OR REPLACE INTO analyses(image_key, result_json, created_at, expires_at, status, image_sha256)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                analysis.image_key,
                result_json,
                to_sql_time(analysis.created_at, "created_at")?,
                to_sql_time(analysis.expires_at, "expires_at")?,
                analysis.status,
                analysis.image_sha256
            ],
        )?;
        Ok(())
    }

    fn get(&self, image_key: &str) -> Result<Option<StoredAnalysis>> {
        let now = to_sql_time(now_s()?, "now")?;
        let row = self
            .lock()?
            .query_row(
                r#"
                SELECT result_json, created_at, expires_at, status, image_sha256
                FROM analyses WHERE image_key = ?1 AND expires_at > ?2
                "#,
                params![image_key, now],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((result_json, created_at, expires_at, status, image_sha256)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredAnalysis {
            image_key: image_key.to_string(),
            result: serde_json::from_str(&result_json)?,
            created_at: from_sql_time(created_at, "created_at")?,
            expires_at: from_sql_time(expires_at, "expires_at")?,
            status,
            image_sha256,
        }))
    }

    fn purge_expired(&self, now: u64) -> Result<usize> {
        let removed = self.lock()?.execute(
            "DELETE FROM analyses WHERE expires_at <= ?1",
            params![to_sql_time(now, "now")?],
        )?;
        Ok(removed)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    analyses: Mutex<HashMap<String, StoredAnalysis>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredAnalysis>>> {
        self.analyses
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))
    }
}

impl ResultStore for InMemoryResultStore {
    fn put(&self, analysis: &StoredAnalysis) -> Result<()> {
        self.lock()?
            .insert(analysis.image_key.clone(), analysis.clone());
        Ok(())
    }

    fn get(&self, image_key: &str) -> Result<Option<StoredAnalysis>> {
        let now = now_s()?;
        Ok(self
            .lock()?
            .get(image_key)
            .filter(|analysis| !analysis.is_expired(now))
            .cloned())
    }

    fn purge_expired(&self, now: u64) -> Result<usize> {
        let mut analyses = self.lock()?;
        let before = analyses.len();
        analyses.retain(|_, analysis| !analysis.is_expired(now));
        Ok(before - analyses.len())
    }
}
