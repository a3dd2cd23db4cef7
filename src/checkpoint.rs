//! Checkpoint store: durable snapshots of workflow state keyed by phase.
//!
//! At most one checkpoint is retained per phase; `create` is idempotent in
//! the sense that a second call for the same phase replaces only that
//! phase's prior snapshot. Checkpoints are immutable once taken.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::errors::RecoveryFault;
use crate::phase::Phase;
use crate::state::{StateField, WorkflowState};

/// Opaque handle to one stored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable snapshot of `WorkflowState` tagged with the phase at which
/// it was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    state: WorkflowState,
}

impl Checkpoint {
    /// Read-only view of the snapshotted state.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }
}

/// In-memory checkpoint store, one slot per phase.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    by_phase: BTreeMap<Phase, Checkpoint>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot `state` for `phase`, replacing any prior checkpoint for that
    /// phase only. Returns the new checkpoint's id.
    pub fn create(&mut self, phase: Phase, state: &WorkflowState) -> CheckpointId {
        let checkpoint = Checkpoint {
            id: CheckpointId::generate(),
            phase,
            created_at: Utc::now(),
            state: state.clone(),
        };
        let id = checkpoint.id;
        if self.by_phase.insert(phase, checkpoint).is_some() {
            tracing::debug!(%phase, checkpoint_id = %id, "replaced checkpoint");
        } else {
            tracing::debug!(%phase, checkpoint_id = %id, "created checkpoint");
        }
        id
    }

    /// The id of the retained checkpoint for `phase`, if one exists.
    pub fn latest_for(&self, phase: Phase) -> Option<CheckpointId> {
        self.by_phase.get(&phase).map(|c| c.id)
    }

    /// Restore the state snapshotted under `id`.
    pub fn restore(&self, id: CheckpointId) -> Option<WorkflowState> {
        self.by_phase
            .values()
            .find(|c| c.id == id)
            .map(|c| c.state.clone())
    }

    /// Restore the retained checkpoint for `phase`, or raise
    /// `CheckpointUnavailable`.
    pub fn restore_latest(&self, phase: Phase) -> Result<WorkflowState, RecoveryFault> {
        self.by_phase
            .get(&phase)
            .map(|c| c.state.clone())
            .ok_or(RecoveryFault::CheckpointUnavailable { phase })
    }

    /// Search checkpoints at or before `phase`, newest phase first, for one
    /// whose snapshot has a non-empty `field`. Used by recovery to restore a
    /// single missing field.
    pub fn find_field(&self, phase: Phase, field: StateField) -> Option<&Checkpoint> {
        std::iter::once(phase)
            .chain(phase.predecessors_desc())
            .filter_map(|p| self.by_phase.get(&p))
            .find(|c| c.state.field_len(field) > 0)
    }

    pub fn len(&self) -> usize {
        self.by_phase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_phase.is_empty()
    }
}
