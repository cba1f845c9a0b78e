// src/store/memory.rs
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{validate, RecordStore};
use crate::error::StoreError;
use crate::model::{Category, IntelItem};

/// Ordering key: publish time, then insertion sequence. Iterated in
/// reverse for newest-first reads.
type OrderKey = (DateTime<Utc>, u64, String);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    seq: u64,
    item: IntelItem,
}

impl Slot {
    fn key(&self) -> OrderKey {
        (self.item.published, self.seq, self.item.id.clone())
    }
}

/// Arena of records keyed by id plus the secondary indices. Every mutation
/// goes through `attach`/`detach` so the indices never drift from the arena.
#[derive(Debug, Default)]
struct Arena {
    records: HashMap<String, Slot>,
    by_fingerprint: HashMap<String, String>,
    by_category: HashMap<Category, BTreeSet<OrderKey>>,
    by_published: BTreeSet<OrderKey>,
    next_seq: u64,
}

impl Arena {
    fn contains(&self, item: &IntelItem) -> bool {
        self.records.contains_key(&item.id) || self.by_fingerprint.contains_key(&item.fingerprint)
    }

    fn attach(&mut self, slot: Slot) {
        let key = slot.key();
        self.next_seq = self.next_seq.max(slot.seq + 1);
        self.by_fingerprint
            .insert(slot.item.fingerprint.clone(), slot.item.id.clone());
        self.by_category
            .entry(slot.item.category)
            .or_default()
            .insert(key.clone());
        self.by_published.insert(key);
        self.records.insert(slot.item.id.clone(), slot);
    }

    fn detach(&mut self, id: &str) -> Option<Slot> {
        let slot = self.records.remove(id)?;
        let key = slot.key();
        self.by_fingerprint.remove(&slot.item.fingerprint);
        if let Some(set) = self.by_category.get_mut(&slot.item.category) {
            set.remove(&key);
        }
        self.by_published.remove(&key);
        Some(slot)
    }

    fn ordered<'a>(&'a self, category: Option<Category>) -> Box<dyn Iterator<Item = &'a OrderKey> + 'a> {
        match category {
            None => Box::new(self.by_published.iter().rev()),
            Some(c) => match self.by_category.get(&c) {
                Some(set) => Box::new(set.iter().rev()),
                None => Box::new(std::iter::empty()),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    records: Vec<Slot>,
}

/// In-process store. Reads take a shared lock; writes stage the whole batch
/// before touching the arena, then commit under the exclusive lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    arena: RwLock<Arena>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists and persist there after each committed write.
    pub fn with_snapshot(path: &Path) -> Result<Self, StoreError> {
        let mut arena = Arena::default();
        if path.exists() {
            let raw = fs::read(path)?;
            let snap: Snapshot = serde_json::from_slice(&raw)?;
            for slot in snap.records {
                arena.attach(slot);
            }
            tracing::info!(
                target: "store",
                records = arena.records.len(),
                path = %path.display(),
                "loaded snapshot"
            );
        } else if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            arena: RwLock::new(arena),
            snapshot: Some(path.to_path_buf()),
        })
    }

    /// Write-then-rename so a crash never leaves a torn snapshot.
    fn persist(&self, arena: &Arena) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let mut records: Vec<Slot> = arena.records.values().cloned().collect();
        records.sort_by_key(|s| s.seq);
        let bytes = serde_json::to_vec(&Snapshot { records })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn insert_batch(&self, items: &[IntelItem]) -> Result<usize, StoreError> {
        let mut arena = self.arena.write();

        // stage: validate everything and resolve in-batch collisions first
        let mut staged = Vec::new();
        let mut batch_ids = HashSet::new();
        let mut batch_fps = HashSet::new();
        for item in items {
            validate(item)?;
            // a skipped record must not reserve its id or fingerprint
            if arena.contains(item)
                || batch_ids.contains(item.id.as_str())
                || batch_fps.contains(item.fingerprint.as_str())
            {
                continue;
            }
            batch_ids.insert(item.id.as_str());
            batch_fps.insert(item.fingerprint.as_str());
            staged.push(item);
        }
        if staged.is_empty() {
            return Ok(0);
        }

        // commit
        let base = arena.next_seq;
        let ids: Vec<String> = staged.iter().map(|i| i.id.clone()).collect();
        for (offset, item) in staged.into_iter().enumerate() {
            arena.attach(Slot {
                seq: base + offset as u64,
                item: item.clone(),
            });
        }

        if let Err(e) = self.persist(&arena) {
            for id in &ids {
                arena.detach(id);
            }
            arena.next_seq = base;
            return Err(e);
        }
        Ok(ids.len())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<IntelItem>, StoreError> {
        let arena = self.arena.read();
        Ok(arena.records.get(id).map(|s| s.item.clone()))
    }

    fn get_latest(
        &self,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<IntelItem>, StoreError> {
        let arena = self.arena.read();
        let take = if limit == 0 { usize::MAX } else { limit };
        Ok(arena
            .ordered(category)
            .take(take)
            .filter_map(|(_, _, id)| arena.records.get(id))
            .map(|s| s.item.clone())
            .collect())
    }

    fn count(&self, category: Option<Category>) -> Result<usize, StoreError> {
        let arena = self.arena.read();
        Ok(match category {
            None => arena.records.len(),
            Some(c) => arena.by_category.get(&c).map_or(0, |s| s.len()),
        })
    }

    fn evict_published_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut arena = self.arena.write();
        let expired: Vec<String> = arena
            .by_published
            .iter()
            .take_while(|(published, _, _)| *published < cutoff)
            .map(|(_, _, id)| id.clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let removed: Vec<Slot> = expired.iter().filter_map(|id| arena.detach(id)).collect();
        if let Err(e) = self.persist(&arena) {
            for slot in removed {
                arena.attach(slot);
            }
            return Err(e);
        }
        Ok(removed.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
