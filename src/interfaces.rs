//! Contracts for external collaborators.
//!
//! The core consumes these through narrow interfaces and stays agnostic to
//! the implementations: publication retrieval lives behind `DocumentSource`,
//! and the long-term memory tiers are backed by `Storage`. In-memory
//! implementations are provided for embedding and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::memory::MemoryItem;
use crate::state::Document;

/// Supplies normalized publication records for a query. Pagination and rate
/// limiting are the implementor's concern.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<Vec<Document>>;
}

/// Filter for `Storage::query`.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageFilter {
    /// Keys beginning with the given prefix.
    KeyPrefix(String),
    /// Items created within the half-open range `[from, to)`.
    TimeRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    /// Items whose content contains the given needle.
    Content(String),
}

/// Durable key-value storage backing the long-term memory tiers. Writes are
/// durable until explicitly removed; the core never evicts through this
/// interface.
pub trait Storage: Send + Sync {
    fn put(&mut self, key: &str, value: MemoryItem);
    fn get(&self, key: &str) -> Option<MemoryItem>;
    fn query(&self, filter: &StorageFilter) -> Vec<MemoryItem>;
    /// Explicit purge. Returns the removed item, if any.
    fn remove(&mut self, key: &str) -> Option<MemoryItem>;
}

/// Map-backed storage for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: BTreeMap<String, MemoryItem>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Storage for InMemoryStorage {
    fn put(&mut self, key: &str, value: MemoryItem) {
        self.items.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<MemoryItem> {
        self.items.get(key).cloned()
    }

    fn query(&self, filter: &StorageFilter) -> Vec<MemoryItem> {
        match filter {
            StorageFilter::KeyPrefix(prefix) => self
                .items
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                .map(|(_, v)| v.clone())
                .collect(),
            StorageFilter::TimeRange { from, to } => self
                .items
                .values()
                .filter(|item| item.created_at >= *from && item.created_at < *to)
                .cloned()
                .collect(),
            StorageFilter::Content(needle) => self
                .items
                .values()
                .filter(|item| item.content.contains(needle.as_str()))
                .cloned()
                .collect(),
        }
    }

    fn remove(&mut self, key: &str) -> Option<MemoryItem> {
        self.items.remove(key)
    }
}

/// Canned document source for tests and offline runs.
#[derive(Debug, Default)]
pub struct StaticDocumentSource {
    documents: Vec<Document>,
}

impl StaticDocumentSource {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentSource for StaticDocumentSource {
    async fn fetch(&self, query: &str) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| {
                query.is_empty()
                    || d.title.to_lowercase().contains(&query.to_lowercase())
                    || d.abstract_text.to_lowercase().contains(&query.to_lowercase())
            })
            .cloned()
            .collect())
    }
}
