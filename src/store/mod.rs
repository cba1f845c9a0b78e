// src/store/mod.rs
//! Record store. Owns every persisted [`IntelItem`] and the global
//! fingerprint-uniqueness invariant.
//!
//! Two backends share one contract:
//! - [`MemoryStore`]: record arena keyed by id with secondary indices,
//!   optionally snapshotted to a JSON file after each committed write.
//! - [`SqliteStore`]: durable SQLite table with the same index set.

mod memory;
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Category, IntelItem};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage contract. Every method is safe to call concurrently from
/// workers and the query path.
pub trait RecordStore: Send + Sync {
    /// Insert records whose fingerprint (and id) is not yet present.
    /// Returns the number actually inserted. All-or-nothing per batch: any
    /// error leaves the store exactly as it was before the call.
    fn insert_batch(&self, items: &[IntelItem]) -> Result<usize, StoreError>;

    fn get_by_id(&self, id: &str) -> Result<Option<IntelItem>, StoreError>;

    /// Newest publish time first, ties newest insertion first.
    /// `limit == 0` returns every match.
    fn get_latest(
        &self,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<IntelItem>, StoreError>;

    fn count(&self, category: Option<Category>) -> Result<usize, StoreError>;

    /// Remove records published strictly before `cutoff`.
    fn evict_published_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    fn backend(&self) -> &'static str;

    /// Retention policy entry point: evict records older than `now - max_age`.
    /// A `max_age` reaching past the representable range evicts nothing.
    fn evict_older_than(&self, max_age: Duration) -> Result<usize, StoreError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            tracing::warn!(target: "store", ?max_age, "retention window out of range, nothing evicted");
            return Ok(0);
        };
        let evicted = self.evict_published_before(cutoff)?;
        if evicted > 0 {
            tracing::info!(target: "store", evicted, backend = self.backend(), "evicted expired records");
        }
        Ok(evicted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Open the configured backend. For `Memory`, `path` is the snapshot file
/// (`None` keeps everything in RAM only).
pub fn open_store(
    backend: StoreBackend,
    path: Option<&Path>,
) -> Result<Arc<dyn RecordStore>, StoreError> {
    let store: Arc<dyn RecordStore> = match (backend, path) {
        (StoreBackend::Sqlite, Some(p)) => Arc::new(SqliteStore::open(p)?),
        (StoreBackend::Sqlite, None) => Arc::new(SqliteStore::open_in_memory()?),
        (StoreBackend::Memory, Some(p)) => Arc::new(MemoryStore::with_snapshot(p)?),
        (StoreBackend::Memory, None) => Arc::new(MemoryStore::new()),
    };
    tracing::info!(target: "store", backend = store.backend(), "store initialized");
    Ok(store)
}

/// Reject records that could never be looked up or deduplicated.
pub(crate) fn validate(item: &IntelItem) -> Result<(), StoreError> {
    let reason = if item.id.trim().is_empty() {
        "empty id"
    } else if item.fingerprint.trim().is_empty() {
        "empty fingerprint"
    } else if item.source_id.trim().is_empty() {
        "empty source id"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidRecord {
        id: item.id.clone(),
        reason,
    })
}
