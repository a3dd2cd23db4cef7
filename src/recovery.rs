//! Fault-driven repair and rollback of workflow state.
//!
//! The recovery manager dispatches on fault kind:
//! - `RequiredField` — restore the field from the newest checkpoint that
//!   contains it, else downgrade to the phase authoritative for producing it
//! - `DataConsistency` — apply the deterministic, idempotent repair (drop
//!   dangling references) and let the caller re-validate
//! - anything else — generic rollback to the current phase's checkpoint
//!
//! Attempts are counted per phase; exceeding the configured ceiling raises
//! the terminal `ExhaustedRetries`. A missing checkpoint during generic
//! rollback is likewise terminal.

use std::collections::HashMap;

use crate::checkpoint::CheckpointStore;
use crate::errors::{RecoveryFault, ValidationFault, WorkflowFault};
use crate::phase::Phase;
use crate::state::{StateField, WorkflowState};

/// What recovery did to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// A single field was restored from a checkpoint taken at `from_phase`.
    FieldRestored {
        field: StateField,
        from_phase: Phase,
    },
    /// No checkpoint held the field; the workflow was moved back to the
    /// phase that produces it.
    Downgraded { to: Phase },
    /// Dangling references were dropped in place.
    Repaired { dropped: usize },
    /// The entire state was restored from the current phase's checkpoint.
    RolledBack { to: Phase },
}

/// Applies fault-kind-specific recovery strategies, bounded per phase.
#[derive(Debug)]
pub struct RecoveryManager {
    max_retries: u32,
    attempts: HashMap<Phase, u32>,
}

impl RecoveryManager {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: HashMap::new(),
        }
    }

    /// Attempts recorded against `phase` so far.
    pub fn attempts_for(&self, phase: Phase) -> u32 {
        self.attempts.get(&phase).copied().unwrap_or(0)
    }

    /// Clear the attempt counter for a phase. Called by the state machine
    /// when the workflow successfully advances out of it.
    pub fn note_advanced(&mut self, phase: Phase) {
        self.attempts.remove(&phase);
    }

    /// Attempt to recover `state` from `fault`. On success the state has
    /// been repaired, downgraded, or rolled back in place and the caller
    /// re-runs the phase loop; on error the fault is terminal.
    pub fn recover(
        &mut self,
        fault: &WorkflowFault,
        state: &mut WorkflowState,
        store: &CheckpointStore,
    ) -> Result<RecoveryAction, RecoveryFault> {
        let phase = state.phase;
        let attempts = self.attempts.entry(phase).or_insert(0);
        *attempts += 1;
        if *attempts > self.max_retries {
            tracing::error!(%phase, attempts = *attempts, "recovery retries exhausted");
            return Err(RecoveryFault::ExhaustedRetries {
                phase,
                attempts: *attempts,
            });
        }
        let attempt = *attempts;
        tracing::warn!(%phase, attempt, fault = fault.kind(), "attempting recovery");

        match fault {
            WorkflowFault::Validation(ValidationFault::RequiredField { field, .. }) => {
                self.restore_field(*field, state, store)
            }
            WorkflowFault::Validation(ValidationFault::DataConsistency { .. }) => {
                let dropped = repair_consistency(state);
                tracing::info!(%phase, dropped, "dropped dangling references");
                Ok(RecoveryAction::Repaired { dropped })
            }
            // Terminal faults are never re-dispatched through recovery.
            WorkflowFault::Recovery(inner) => Err(inner.clone()),
            WorkflowFault::Agent(_) => self.rollback(state, store),
        }
    }

    fn restore_field(
        &self,
        field: StateField,
        state: &mut WorkflowState,
        store: &CheckpointStore,
    ) -> Result<RecoveryAction, RecoveryFault> {
        if let Some(checkpoint) = store.find_field(state.phase, field) {
            state.copy_field_from(checkpoint.state(), field);
            tracing::info!(
                %field,
                from_phase = %checkpoint.phase,
                "restored field from checkpoint"
            );
            return Ok(RecoveryAction::FieldRestored {
                field,
                from_phase: checkpoint.phase,
            });
        }

        let owner = Phase::owner_of(field);
        tracing::info!(%field, to = %owner, "no checkpoint holds field, downgrading phase");
        state.phase = owner;
        state.touch();
        Ok(RecoveryAction::Downgraded { to: owner })
    }

    fn rollback(
        &self,
        state: &mut WorkflowState,
        store: &CheckpointStore,
    ) -> Result<RecoveryAction, RecoveryFault> {
        let phase = state.phase;
        let restored = store.restore_latest(phase)?;
        *state = restored;
        state.touch();
        tracing::info!(%phase, "rolled back to phase checkpoint");
        Ok(RecoveryAction::RolledBack { to: phase })
    }
}

/// Drop every reference that points at a missing record. Deterministic and
/// idempotent: a second application on the repaired state drops nothing.
pub fn repair_consistency(state: &mut WorkflowState) -> usize {
    let before = state.citations.len()
        + state.experiment_designs.len()
        + state.validation_outcomes.len();

    let doc_ids: std::collections::HashSet<&str> = state
        .processed_documents
        .iter()
        .map(|d| d.id.as_str())
        .collect();
    state
        .citations
        .retain(|c| doc_ids.contains(c.citing_id.as_str()) && doc_ids.contains(c.cited_id.as_str()));

    let hypothesis_ids: std::collections::HashSet<&str> =
        state.hypotheses.iter().map(|h| h.id.as_str()).collect();
    state
        .experiment_designs
        .retain(|e| hypothesis_ids.contains(e.hypothesis_id.as_str()));
    state
        .validation_outcomes
        .retain(|v| hypothesis_ids.contains(v.hypothesis_id.as_str()));

    let after = state.citations.len()
        + state.experiment_designs.len()
        + state.validation_outcomes.len();
    state.touch();
    before - after
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentFault;
    use crate::state::{Citation, Document, ExperimentDesign, Hypothesis};

    fn state_with_docs(count: usize) -> WorkflowState {
        let mut state = WorkflowState::new();
        for i in 0..count {
            state
                .processed_documents
                .push(Document::new(&format!("d{}", i), "Paper"));
        }
        state
    }

    fn required_field_fault(field: StateField) -> WorkflowFault {
        ValidationFault::RequiredField {
            phase: Phase::CitationAnalysis,
            field,
            minimum: 1,
            found: 0,
        }
        .into()
    }

    #[test]
    fn test_repair_drops_dangling_citations_only() {
        let mut state = state_with_docs(2);
        state.citations.push(Citation::new("d0", "d1"));
        state.citations.push(Citation::new("d0", "ghost"));

        let dropped = repair_consistency(&mut state);
        assert_eq!(dropped, 1);
        assert_eq!(state.citations.len(), 1);

        // Idempotent: second pass drops nothing
        assert_eq!(repair_consistency(&mut state), 0);
    }

    #[test]
    fn test_repair_drops_orphan_designs_and_outcomes() {
        let mut state = WorkflowState::new();
        state.hypotheses.push(Hypothesis::new("h1", "A"));
        state
            .experiment_designs
            .push(ExperimentDesign::new("e1", "h1", "p"));
        state
            .experiment_designs
            .push(ExperimentDesign::new("e2", "h-gone", "p"));

        assert_eq!(repair_consistency(&mut state), 1);
        assert_eq!(state.experiment_designs.len(), 1);
    }

    #[test]
    fn test_required_field_restored_from_checkpoint() {
        let mut store = CheckpointStore::new();
        let snapshot = state_with_docs(6);
        store.create(Phase::LiteratureReview, &snapshot);

        let mut state = WorkflowState::new();
        state.phase = Phase::CitationAnalysis;

        let mut manager = RecoveryManager::new(3);
        let action = manager
            .recover(
                &required_field_fault(StateField::ProcessedDocuments),
                &mut state,
                &store,
            )
            .unwrap();

        assert_eq!(
            action,
            RecoveryAction::FieldRestored {
                field: StateField::ProcessedDocuments,
                from_phase: Phase::LiteratureReview,
            }
        );
        assert_eq!(state.processed_documents.len(), 6);
        // Phase is untouched by a field restore
        assert_eq!(state.phase, Phase::CitationAnalysis);
    }

    #[test]
    fn test_required_field_downgrades_without_checkpoint() {
        let store = CheckpointStore::new();
        let mut state = WorkflowState::new();
        state.phase = Phase::HypothesisGeneration;

        let mut manager = RecoveryManager::new(3);
        let action = manager
            .recover(
                &required_field_fault(StateField::ProcessedDocuments),
                &mut state,
                &store,
            )
            .unwrap();

        assert_eq!(
            action,
            RecoveryAction::Downgraded {
                to: Phase::LiteratureReview
            }
        );
        assert_eq!(state.phase, Phase::LiteratureReview);
    }

    #[test]
    fn test_agent_fault_triggers_generic_rollback() {
        let mut store = CheckpointStore::new();
        let mut snapshot = state_with_docs(5);
        snapshot.phase = Phase::CitationAnalysis;
        store.create(Phase::CitationAnalysis, &snapshot);

        let mut state = snapshot.clone();
        state.citations.push(Citation::new("d0", "d1"));

        let fault: WorkflowFault = AgentFault::Execution {
            agent_id: "a1".into(),
            role: "citation_mapper".into(),
            message: "boom".into(),
        }
        .into();

        let mut manager = RecoveryManager::new(3);
        let action = manager.recover(&fault, &mut state, &store).unwrap();
        assert_eq!(
            action,
            RecoveryAction::RolledBack {
                to: Phase::CitationAnalysis
            }
        );
        assert!(state.citations.is_empty());
    }

    #[test]
    fn test_rollback_without_checkpoint_escalates() {
        let store = CheckpointStore::new();
        let mut state = WorkflowState::new();
        state.phase = Phase::Validation;

        let fault: WorkflowFault = AgentFault::Cancelled {
            phase: Phase::Validation,
        }
        .into();

        let mut manager = RecoveryManager::new(3);
        let err = manager.recover(&fault, &mut state, &store).unwrap_err();
        assert_eq!(
            err,
            RecoveryFault::CheckpointUnavailable {
                phase: Phase::Validation
            }
        );
    }

    #[test]
    fn test_retries_exhaust_at_ceiling() {
        let mut store = CheckpointStore::new();
        let state_snapshot = WorkflowState::new();
        store.create(Phase::LiteratureReview, &state_snapshot);

        let mut state = WorkflowState::new();
        let fault: WorkflowFault = ValidationFault::DataConsistency {
            description: "persistent".into(),
        }
        .into();

        let mut manager = RecoveryManager::new(2);
        assert!(manager.recover(&fault, &mut state, &store).is_ok());
        assert!(manager.recover(&fault, &mut state, &store).is_ok());
        let err = manager.recover(&fault, &mut state, &store).unwrap_err();
        assert_eq!(
            err,
            RecoveryFault::ExhaustedRetries {
                phase: Phase::LiteratureReview,
                attempts: 3,
            }
        );
    }

    #[test]
    fn test_advancing_resets_attempt_counter() {
        let store = CheckpointStore::new();
        let mut state = WorkflowState::new();
        let fault: WorkflowFault = ValidationFault::DataConsistency {
            description: "x".into(),
        }
        .into();

        let mut manager = RecoveryManager::new(1);
        assert!(manager.recover(&fault, &mut state, &store).is_ok());
        assert_eq!(manager.attempts_for(Phase::LiteratureReview), 1);

        manager.note_advanced(Phase::LiteratureReview);
        assert_eq!(manager.attempts_for(Phase::LiteratureReview), 0);
        assert!(manager.recover(&fault, &mut state, &store).is_ok());
    }

    #[test]
    fn test_terminal_fault_passes_through() {
        let store = CheckpointStore::new();
        let mut state = WorkflowState::new();
        let fault: WorkflowFault = RecoveryFault::CheckpointUnavailable {
            phase: Phase::Synthesis,
        }
        .into();

        let mut manager = RecoveryManager::new(5);
        let err = manager.recover(&fault, &mut state, &store).unwrap_err();
        assert_eq!(
            err,
            RecoveryFault::CheckpointUnavailable {
                phase: Phase::Synthesis
            }
        );
    }
}
