//! Structured observability events and the cross-cutting fault monitor.
//!
//! Every component reports through the state machine's `EventSink`; events
//! go to `tracing` unconditionally and to an optional mpsc channel for
//! external sinks. `FaultMonitor` folds an event stream into counters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::phase::Phase;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A transition committed (advance or re-entry).
    PhaseTransition { from: Phase, to: Phase },
    /// A fault was raised somewhere in the core.
    FaultRaised { phase: Phase, kind: String },
    /// The recovery manager attempted a repair, rollback, or downgrade.
    RecoveryAttempted { phase: Phase, action: String },
    /// A checkpoint was created or replaced.
    CheckpointCreated { phase: Phase, checkpoint_id: String },
}

/// Fans events out to tracing and an optional channel sink.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<WorkflowEvent>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub async fn emit(&self, event: WorkflowEvent) {
        match &event {
            WorkflowEvent::PhaseTransition { from, to } => {
                tracing::info!(%from, %to, "phase transition");
            }
            WorkflowEvent::FaultRaised { phase, kind } => {
                tracing::warn!(%phase, kind, "fault raised");
            }
            WorkflowEvent::RecoveryAttempted { phase, action } => {
                tracing::info!(%phase, action, "recovery attempted");
            }
            WorkflowEvent::CheckpointCreated {
                phase,
                checkpoint_id,
            } => {
                tracing::debug!(%phase, checkpoint_id, "checkpoint created");
            }
        }
        if let Some(tx) = &self.tx {
            tx.send(event).await.ok();
        }
    }
}

/// Counter view over an event stream.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FaultMonitor {
    pub transitions: u64,
    pub checkpoints: u64,
    pub recovery_attempts: u64,
    /// Fault counts keyed by fault kind tag.
    pub faults: HashMap<String, u64>,
}

impl FaultMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::PhaseTransition { .. } => self.transitions += 1,
            WorkflowEvent::CheckpointCreated { .. } => self.checkpoints += 1,
            WorkflowEvent::RecoveryAttempted { .. } => self.recovery_attempts += 1,
            WorkflowEvent::FaultRaised { kind, .. } => {
                *self.faults.entry(kind.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn total_faults(&self) -> u64 {
        self.faults.values().sum()
    }

    /// Drain a receiver that has stopped receiving new events and fold
    /// everything pending into the counters.
    pub fn drain(&mut self, rx: &mut mpsc::Receiver<WorkflowEvent>) {
        while let Ok(event) = rx.try_recv() {
            self.observe(&event);
        }
    }
}
