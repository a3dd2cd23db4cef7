//! Pure state validation against the per-phase requirements table.
//!
//! Validation runs in two passes:
//! 1. presence/cardinality of the fields the phase must have produced,
//!    raising `RequiredField` on the first miss
//! 2. cross-field consistency (referential integrity between citations and
//!    processed documents, experiment designs and hypotheses, validation
//!    outcomes and hypotheses), raising `DataConsistency`
//!
//! The validator is a pure function of `WorkflowState` with no side effects;
//! calling it repeatedly on the same state yields the same result.

use crate::config::WorkflowConfig;
use crate::errors::ValidationFault;
use crate::phase::Phase;
use crate::state::{StateField, WorkflowState};

/// One row of the requirements table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Requirement {
    pub field: StateField,
    pub minimum: usize,
}

/// Validates workflow state before a phase transition commits.
#[derive(Debug, Clone)]
pub struct StateValidator {
    min_documents: usize,
    min_hypotheses: usize,
}

impl StateValidator {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            min_documents: config.min_documents,
            min_hypotheses: config.min_hypotheses,
        }
    }

    /// Fields (and minimum cardinalities) a phase must have produced before
    /// the workflow may advance out of it.
    pub fn requirements(&self, phase: Phase) -> Vec<Requirement> {
        match phase {
            Phase::LiteratureReview => vec![Requirement {
                field: StateField::ProcessedDocuments,
                minimum: self.min_documents,
            }],
            Phase::CitationAnalysis => vec![Requirement {
                field: StateField::Citations,
                minimum: 1,
            }],
            Phase::HypothesisGeneration => vec![Requirement {
                field: StateField::Hypotheses,
                minimum: self.min_hypotheses,
            }],
            Phase::ExperimentalDesign => vec![Requirement {
                field: StateField::ExperimentDesigns,
                minimum: 1,
            }],
            Phase::Validation => vec![Requirement {
                field: StateField::ValidationOutcomes,
                minimum: 1,
            }],
            Phase::Synthesis => Vec::new(),
        }
    }

    /// Phase completion predicate: has the phase produced enough output to
    /// stop re-entering it? Cardinality only, no consistency checks.
    pub fn completion_met(&self, phase: Phase, state: &WorkflowState) -> bool {
        self.requirements(phase)
            .iter()
            .all(|req| state.field_len(req.field) >= req.minimum)
    }

    /// Full two-pass validation for leaving `phase`.
    pub fn validate(&self, state: &WorkflowState, phase: Phase) -> Result<(), ValidationFault> {
        // Pass 1: presence and cardinality
        for req in self.requirements(phase) {
            let found = state.field_len(req.field);
            if found < req.minimum {
                return Err(ValidationFault::RequiredField {
                    phase,
                    field: req.field,
                    minimum: req.minimum,
                    found,
                });
            }
        }

        // Pass 2: cross-field consistency
        self.check_consistency(state)
    }

    fn check_consistency(&self, state: &WorkflowState) -> Result<(), ValidationFault> {
        for citation in &state.citations {
            for doc_id in [&citation.citing_id, &citation.cited_id] {
                if !state.has_document(doc_id) {
                    return Err(ValidationFault::DataConsistency {
                        description: format!(
                            "citation references missing document {}",
                            doc_id
                        ),
                    });
                }
            }
        }

        for design in &state.experiment_designs {
            if !state.has_hypothesis(&design.hypothesis_id) {
                return Err(ValidationFault::DataConsistency {
                    description: format!(
                        "experiment design {} references missing hypothesis {}",
                        design.id, design.hypothesis_id
                    ),
                });
            }
        }

        for outcome in &state.validation_outcomes {
            if !state.has_hypothesis(&outcome.hypothesis_id) {
                return Err(ValidationFault::DataConsistency {
                    description: format!(
                        "validation outcome references missing hypothesis {}",
                        outcome.hypothesis_id
                    ),
                });
            }
        }

        Ok(())
    }
}

impl Default for StateValidator {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default())
    }
}
