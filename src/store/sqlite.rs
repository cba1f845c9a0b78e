// src/store/sqlite.rs
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{validate, RecordStore};
use crate::error::StoreError;
use crate::model::{Category, IntelItem, Severity};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS intelligence (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT    NOT NULL UNIQUE,
    source_id  TEXT    NOT NULL,
    category   TEXT    NOT NULL,
    title      TEXT    NOT NULL,
    url        TEXT    NOT NULL,
    summary    TEXT    NOT NULL,
    published  INTEGER NOT NULL,
    retrieved  INTEGER NOT NULL,
    hash       TEXT    NOT NULL UNIQUE,
    severity   TEXT
);
CREATE INDEX IF NOT EXISTS idx_intelligence_category ON intelligence(category, published);
CREATE INDEX IF NOT EXISTS idx_intelligence_published ON intelligence(published);
"#;

const COLUMNS: &str =
    "id, source_id, category, title, url, summary, published, retrieved, hash, severity";

/// SQLite-backed store. Timestamps are unix microseconds; `seq` records
/// insertion order for tie-breaking.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Row as stored, before enum/timestamp decoding.
struct RawRow {
    id: String,
    source_id: String,
    category: String,
    title: String,
    url: String,
    summary: String,
    published: i64,
    retrieved: i64,
    hash: String,
    severity: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_id: row.get(1)?,
            category: row.get(2)?,
            title: row.get(3)?,
            url: row.get(4)?,
            summary: row.get(5)?,
            published: row.get(6)?,
            retrieved: row.get(7)?,
            hash: row.get(8)?,
            severity: row.get(9)?,
        })
    }

    fn into_item(self) -> Result<IntelItem, StoreError> {
        let category = self.category.parse::<Category>().map_err(StoreError::Corrupt)?;
        let severity = self
            .severity
            .map(|s| s.parse::<Severity>())
            .transpose()
            .map_err(StoreError::Corrupt)?;
        Ok(IntelItem {
            published: from_micros(self.published)?,
            retrieved: from_micros(self.retrieved)?,
            id: self.id,
            source_id: self.source_id,
            category,
            title: self.title,
            url: self.url,
            summary: self.summary,
            fingerprint: self.hash,
            severity,
        })
    }
}

fn from_micros(v: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(v)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {v}")))
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: usize) -> i64 {
    if limit == 0 {
        -1
    } else {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(target: "store", "sqlite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_items(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<IntelItem>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRow::into_item).collect()
    }
}

impl RecordStore for SqliteStore {
    fn insert_batch(&self, items: &[IntelItem]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        // dropped without commit = rolled back
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR IGNORE INTO intelligence ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ))?;
            for item in items {
                validate(item)?;
                inserted += stmt.execute(params![
                    item.id,
                    item.source_id,
                    item.category.as_str(),
                    item.title,
                    item.url,
                    item.summary,
                    item.published.timestamp_micros(),
                    item.retrieved.timestamp_micros(),
                    item.fingerprint,
                    item.severity.map(|s| s.as_str()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<IntelItem>, StoreError> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM intelligence WHERE id = ?1"),
                params![id],
                RawRow::from_row,
            )
            .optional()?
        };
        raw.map(RawRow::into_item).transpose()
    }

    fn get_latest(
        &self,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<IntelItem>, StoreError> {
        let limit = sql_limit(limit);
        match category {
            None => self.query_items(
                &format!(
                    "SELECT {COLUMNS} FROM intelligence \
                     ORDER BY published DESC, seq DESC LIMIT ?1"
                ),
                params![limit],
            ),
            Some(c) => self.query_items(
                &format!(
                    "SELECT {COLUMNS} FROM intelligence WHERE category = ?1 \
                     ORDER BY published DESC, seq DESC LIMIT ?2"
                ),
                params![c.as_str(), limit],
            ),
        }
    }

    fn count(&self, category: Option<Category>) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = match category {
            None => conn.query_row("SELECT COUNT(*) FROM intelligence", [], |r| r.get(0))?,
            Some(c) => conn.query_row(
                "SELECT COUNT(*) FROM intelligence WHERE category = ?1",
                params![c.as_str()],
                |r| r.get(0),
            )?,
        };
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn evict_published_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM intelligence WHERE published < ?1",
            params![cutoff.timestamp_micros()],
        )?;
        Ok(n)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
