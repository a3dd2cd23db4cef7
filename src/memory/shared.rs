//! Shared memory: the versioned key-value exchange between concurrently
//! running workers.
//!
//! Keys are addressed by `(worker_id, context_id)`. Every write carries a
//! monotonically increasing version per key; concurrent writes to the same
//! key keep the higher version and log a non-fatal conflict warning. Writes
//! to different keys never block each other.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Address of one shared-memory slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedKey {
    pub worker_id: String,
    pub context_id: String,
}

impl SharedKey {
    pub fn new(worker_id: &str, context_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            context_id: context_id.to_string(),
        }
    }
}

impl fmt::Display for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.worker_id, self.context_id)
    }
}

/// A value with its optimistic version counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub version: u64,
    pub value: serde_json::Value,
}

/// The shared tier. Interior mutability so concurrent workers share one
/// instance behind an `Arc`.
#[derive(Debug, Default)]
pub struct SharedMemory {
    slots: RwLock<HashMap<SharedKey, VersionedValue>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value, assigning the next version for the key. Returns the
    /// assigned version.
    pub fn put(&self, key: &SharedKey, value: serde_json::Value) -> u64 {
        let mut slots = self.slots.write().expect("shared memory lock poisoned");
        let next = slots.get(key).map_or(1, |v| v.version + 1);
        slots.insert(
            key.clone(),
            VersionedValue {
                version: next,
                value,
            },
        );
        next
    }

    /// Write with a caller-supplied version. The higher version wins; a
    /// stale write is dropped with a warning and never blocks the caller.
    /// Returns `true` when the write was kept.
    pub fn put_versioned(&self, key: &SharedKey, value: serde_json::Value, version: u64) -> bool {
        let mut slots = self.slots.write().expect("shared memory lock poisoned");
        match slots.get(key) {
            Some(existing) if existing.version >= version => {
                tracing::warn!(
                    key = %key,
                    kept = existing.version,
                    rejected = version,
                    "shared-memory write conflict, keeping higher version"
                );
                false
            }
            _ => {
                slots.insert(key.clone(), VersionedValue { version, value });
                true
            }
        }
    }

    pub fn get(&self, key: &SharedKey) -> Option<VersionedValue> {
        self.slots
            .read()
            .expect("shared memory lock poisoned")
            .get(key)
            .cloned()
    }

    /// All slots written by a worker, in arbitrary order.
    pub fn entries_for_worker(&self, worker_id: &str) -> Vec<(SharedKey, VersionedValue)> {
        self.slots
            .read()
            .expect("shared memory lock poisoned")
            .iter()
            .filter(|(k, _)| k.worker_id == worker_id)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Drop all slots for a context once the coordinator has folded the
    /// intermediate results into the workflow state.
    pub fn clear_context(&self, context_id: &str) {
        self.slots
            .write()
            .expect("shared memory lock poisoned")
            .retain(|k, _| k.context_id != context_id);
    }

    pub fn len(&self) -> usize {
        self.slots.read().expect("shared memory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
