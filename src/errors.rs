//! Typed fault hierarchy for the workflow core.
//!
//! Three mid-level enums cover the three failure domains:
//! - `ValidationFault` — state invariant violations found at transition time
//! - `AgentFault` — worker execution, stall, and cancellation failures
//! - `RecoveryFault` — terminal failures of the recovery machinery itself
//!
//! `WorkflowFault` is the umbrella the recovery manager dispatches on. Only
//! `RecoveryFault` values cross the workflow boundary to callers; everything
//! else is absorbed by recovery and journaled.

use thiserror::Error;

use crate::phase::Phase;
use crate::state::StateField;

/// State invariant violations raised by the validator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFault {
    #[error("Phase {phase} requires field {field} (minimum {minimum}, found {found})")]
    RequiredField {
        phase: Phase,
        field: StateField,
        minimum: usize,
        found: usize,
    },

    #[error("Data consistency violation: {description}")]
    DataConsistency { description: String },
}

impl ValidationFault {
    /// The field this fault concerns, when it names one.
    pub fn field(&self) -> Option<StateField> {
        match self {
            ValidationFault::RequiredField { field, .. } => Some(*field),
            ValidationFault::DataConsistency { .. } => None,
        }
    }
}

/// Worker-side failures observed by the coordinator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentFault {
    #[error("Agent {agent_id} ({role}) missed its deadline after {timeout_secs}s")]
    Stalled {
        agent_id: String,
        role: String,
        timeout_secs: u64,
    },

    #[error("Agent {agent_id} ({role}) failed: {message}")]
    Execution {
        agent_id: String,
        role: String,
        message: String,
    },

    #[error("Phase {phase} cancelled by external signal")]
    Cancelled { phase: Phase },

    #[error("Phase {phase} exceeded its duration ceiling of {timeout_secs}s")]
    StalledPhase { phase: Phase, timeout_secs: u64 },
}

/// Terminal failures. These are never retried automatically and are the only
/// faults surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoveryFault {
    #[error("Recovery exhausted after {attempts} attempts in phase {phase}")]
    ExhaustedRetries { phase: Phase, attempts: u32 },

    #[error("No checkpoint available for phase {phase}")]
    CheckpointUnavailable { phase: Phase },
}

/// Umbrella fault the recovery manager dispatches on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowFault {
    #[error(transparent)]
    Validation(#[from] ValidationFault),

    #[error(transparent)]
    Agent(#[from] AgentFault),

    #[error(transparent)]
    Recovery(#[from] RecoveryFault),
}

impl WorkflowFault {
    /// Short machine-readable kind tag, used in journal entries and events.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowFault::Validation(ValidationFault::RequiredField { .. }) => "required_field",
            WorkflowFault::Validation(ValidationFault::DataConsistency { .. }) => {
                "data_consistency"
            }
            WorkflowFault::Agent(AgentFault::Stalled { .. }) => "stalled_agent",
            WorkflowFault::Agent(AgentFault::Execution { .. }) => "agent_execution",
            WorkflowFault::Agent(AgentFault::Cancelled { .. }) => "cancelled",
            WorkflowFault::Agent(AgentFault::StalledPhase { .. }) => "stalled_phase",
            WorkflowFault::Recovery(RecoveryFault::ExhaustedRetries { .. }) => "exhausted_retries",
            WorkflowFault::Recovery(RecoveryFault::CheckpointUnavailable { .. }) => {
                "checkpoint_unavailable"
            }
        }
    }

    /// Whether this fault is terminal for the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowFault::Recovery(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_field_fault_carries_cardinality() {
        let fault = ValidationFault::RequiredField {
            phase: Phase::LiteratureReview,
            field: StateField::ProcessedDocuments,
            minimum: 5,
            found: 3,
        };
        match &fault {
            ValidationFault::RequiredField { minimum, found, .. } => {
                assert_eq!(*minimum, 5);
                assert_eq!(*found, 3);
            }
            _ => panic!("Expected RequiredField variant"),
        }
        assert!(fault.to_string().contains("minimum 5"));
        assert_eq!(fault.field(), Some(StateField::ProcessedDocuments));
    }

    #[test]
    fn data_consistency_fault_has_no_field() {
        let fault = ValidationFault::DataConsistency {
            description: "dangling citation".to_string(),
        };
        assert!(fault.field().is_none());
        assert!(fault.to_string().contains("dangling citation"));
    }

    #[test]
    fn workflow_fault_converts_from_validation_fault() {
        let inner = ValidationFault::DataConsistency {
            description: "orphan design".to_string(),
        };
        let fault: WorkflowFault = inner.into();
        assert_eq!(fault.kind(), "data_consistency");
        assert!(!fault.is_terminal());
    }

    #[test]
    fn recovery_faults_are_terminal() {
        let fault: WorkflowFault = RecoveryFault::ExhaustedRetries {
            phase: Phase::Validation,
            attempts: 3,
        }
        .into();
        assert!(fault.is_terminal());
        assert_eq!(fault.kind(), "exhausted_retries");

        let fault: WorkflowFault = RecoveryFault::CheckpointUnavailable {
            phase: Phase::CitationAnalysis,
        }
        .into();
        assert!(fault.is_terminal());
    }

    #[test]
    fn agent_faults_are_not_terminal() {
        let fault: WorkflowFault = AgentFault::Stalled {
            agent_id: "a1".into(),
            role: "retriever".into(),
            timeout_secs: 30,
        }
        .into();
        assert!(!fault.is_terminal());
        assert_eq!(fault.kind(), "stalled_agent");
    }

    #[test]
    fn all_fault_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ValidationFault::DataConsistency {
            description: "x".into(),
        });
        assert_std_error(&AgentFault::Cancelled {
            phase: Phase::Synthesis,
        });
        assert_std_error(&RecoveryFault::CheckpointUnavailable {
            phase: Phase::Validation,
        });
    }
}
