//! Long-term memory: semantic, procedural, and episodic stores over one
//! `Storage` backend, namespaced by key prefix.
//!
//! Writes are durable and never evicted automatically; removal requires an
//! explicit purge.

use chrono::{DateTime, Utc};

use super::{MemoryItem, MemoryTier};
use crate::interfaces::{Storage, StorageFilter};

fn tier_prefix(tier: MemoryTier) -> &'static str {
    match tier {
        MemoryTier::Working => "working/",
        MemoryTier::Semantic => "semantic/",
        MemoryTier::Procedural => "procedural/",
        MemoryTier::Episodic => "episodic/",
    }
}

/// The three durable tiers behind one storage backend.
pub struct LongTermMemory {
    storage: Box<dyn Storage>,
}

impl LongTermMemory {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Store an item under its tier's namespace. Episodic keys embed the
    /// creation timestamp so range scans stay ordered. Returns the key.
    pub fn store(&mut self, item: MemoryItem) -> String {
        let key = match item.tier {
            MemoryTier::Episodic => format!(
                "{}{}/{}",
                tier_prefix(item.tier),
                item.created_at.timestamp_micros(),
                item.id
            ),
            tier => format!("{}{}", tier_prefix(tier), item.id),
        };
        self.storage.put(&key, item);
        key
    }

    /// Store a procedural action sequence keyed by task kind, replacing any
    /// prior sequence for that kind.
    pub fn store_procedure(&mut self, task_kind: &str, item: MemoryItem) -> String {
        let key = format!("{}{}", tier_prefix(MemoryTier::Procedural), task_kind);
        self.storage.put(&key, item);
        key
    }

    /// The stored procedure for a task kind, if any.
    pub fn procedure_for(&self, task_kind: &str) -> Option<MemoryItem> {
        self.storage
            .get(&format!("{}{}", tier_prefix(MemoryTier::Procedural), task_kind))
    }

    pub fn get(&self, key: &str) -> Option<MemoryItem> {
        self.storage.get(key)
    }

    /// Query one tier. `KeyPrefix` and `Content` filters are scoped to the
    /// tier's namespace; `TimeRange` filters on creation time within it.
    pub fn query(&self, tier: MemoryTier, filter: &StorageFilter) -> Vec<MemoryItem> {
        let prefix = tier_prefix(tier);
        match filter {
            StorageFilter::KeyPrefix(suffix) => self
                .storage
                .query(&StorageFilter::KeyPrefix(format!("{}{}", prefix, suffix))),
            StorageFilter::TimeRange { .. } | StorageFilter::Content(_) => self
                .storage
                .query(filter)
                .into_iter()
                .filter(|item| item.tier == tier)
                .collect(),
        }
    }

    /// Episodic entries within `[from, to)`, oldest first.
    pub fn episodes_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<MemoryItem> {
        let mut items = self.query(MemoryTier::Episodic, &StorageFilter::TimeRange { from, to });
        items.sort_by_key(|i| i.created_at);
        items
    }

    /// Explicit purge of one key. Returns the removed item.
    pub fn purge(&mut self, key: &str) -> Option<MemoryItem> {
        self.storage.remove(key)
    }
}
