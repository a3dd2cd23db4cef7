//! Tiered memory shared across workers.
//!
//! Three tiers behind one manager:
//! - working memory: token-budgeted FIFO, lossy eviction
//! - long-term memory: semantic / procedural / episodic stores over the
//!   external `Storage` contract, durable until purged
//! - shared memory: versioned key-value exchange between concurrent workers

mod long_term;
mod shared;
mod working;

pub use long_term::LongTermMemory;
pub use shared::{SharedKey, SharedMemory, VersionedValue};
pub use working::WorkingMemory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::interfaces::{Storage, StorageFilter};

/// Which tier a memory item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Working,
    Semantic,
    Procedural,
    Episodic,
}

/// One unit of remembered content with a token cost and recency marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub tier: MemoryTier,
    pub content: String,
    pub token_cost: usize,
    pub created_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(tier: MemoryTier, content: &str, token_cost: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tier,
            content: content.to_string(),
            token_cost,
            created_at: Utc::now(),
        }
    }
}

/// Facade over the three tiers. One manager exists per workflow instance;
/// the shared tier is handed to workers by `Arc`.
pub struct MemoryManager {
    working: WorkingMemory,
    long_term: LongTermMemory,
    shared: Arc<SharedMemory>,
}

impl MemoryManager {
    pub fn new(working_budget: usize, storage: Box<dyn Storage>) -> Self {
        Self {
            working: WorkingMemory::new(working_budget),
            long_term: LongTermMemory::new(storage),
            shared: Arc::new(SharedMemory::new()),
        }
    }

    /// Insert into working memory, evicting oldest items as needed to stay
    /// within the token budget. Budget overruns are absorbed here and never
    /// surfaced as errors. Returns the new item's id.
    pub fn remember(&mut self, content: &str, token_cost: usize) -> String {
        let item = MemoryItem::new(MemoryTier::Working, content, token_cost);
        self.working.insert(item)
    }

    /// Move a working item into a long-term tier, making it durable. Returns
    /// the storage key, or `None` if the item has already been evicted
    /// (working-tier eviction is lossy).
    pub fn persist(&mut self, item_id: &str, tier: MemoryTier) -> Option<String> {
        let mut item = self.working.take(item_id)?;
        item.tier = tier;
        Some(self.long_term.store(item))
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }

    pub fn long_term_mut(&mut self) -> &mut LongTermMemory {
        &mut self.long_term
    }

    /// Handle to the shared tier for concurrently-running workers.
    pub fn shared(&self) -> Arc<SharedMemory> {
        Arc::clone(&self.shared)
    }

    /// Record a phase outcome as an episodic experience entry.
    pub fn record_episode(&mut self, content: &str, token_cost: usize) -> String {
        let item = MemoryItem::new(MemoryTier::Episodic, content, token_cost);
        self.long_term.store(item)
    }

    /// Query a long-term store. Working and shared tiers are not queryable
    /// through this path.
    pub fn recall(&self, tier: MemoryTier, filter: &StorageFilter) -> Vec<MemoryItem> {
        self.long_term.query(tier, filter)
    }
}
