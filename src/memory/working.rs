//! Token-budgeted working memory with strict FIFO eviction.

use std::collections::VecDeque;

use super::MemoryItem;

/// An ordered sequence of memory items bounded by a token budget. Insertion
/// that would exceed the budget evicts the oldest items first until the
/// total fits again. Eviction is lossy; evicted items are gone.
#[derive(Debug)]
pub struct WorkingMemory {
    items: VecDeque<MemoryItem>,
    budget: usize,
    total_tokens: usize,
    evicted_count: u64,
}

impl WorkingMemory {
    pub fn new(budget: usize) -> Self {
        Self {
            items: VecDeque::new(),
            budget,
            total_tokens: 0,
            evicted_count: 0,
        }
    }

    /// Insert an item, evicting from the front until the budget holds.
    /// An item costing more than the whole budget evicts everything and is
    /// itself dropped immediately. Returns the inserted item's id.
    pub fn insert(&mut self, item: MemoryItem) -> String {
        let id = item.id.clone();
        self.total_tokens += item.token_cost;
        self.items.push_back(item);

        while self.total_tokens > self.budget {
            // The just-inserted item can be the one evicted when it alone
            // exceeds the budget.
            if let Some(evicted) = self.items.pop_front() {
                self.total_tokens -= evicted.token_cost;
                self.evicted_count += 1;
                tracing::debug!(
                    item_id = %evicted.id,
                    tokens = evicted.token_cost,
                    "evicted working-memory item"
                );
            } else {
                break;
            }
        }

        id
    }

    /// Remove and return an item by id, if it is still resident.
    pub fn take(&mut self, item_id: &str) -> Option<MemoryItem> {
        let index = self.items.iter().position(|i| i.id == item_id)?;
        let item = self.items.remove(index)?;
        self.total_tokens -= item.token_cost;
        Some(item)
    }

    pub fn get(&self, item_id: &str) -> Option<&MemoryItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Items in insertion order, oldest first.
    pub fn items(&self) -> impl Iterator<Item = &MemoryItem> {
        self.items.iter()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted_count
    }
}
