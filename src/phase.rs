//! The fixed phase enumeration and its static tables.
//!
//! This module provides:
//! - `Phase` — the six workflow phases, ordered
//! - the successor graph, including the single back-edge
//!   `Validation -> ExperimentalDesign`
//! - the phase -> required worker roles table
//! - the field -> owning phase table used by recovery downgrades

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::AgentRole;
use crate::state::{StateField, WorkflowState};

/// One stage of the fixed research workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    LiteratureReview,
    CitationAnalysis,
    HypothesisGeneration,
    ExperimentalDesign,
    Validation,
    Synthesis,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 6] = [
        Phase::LiteratureReview,
        Phase::CitationAnalysis,
        Phase::HypothesisGeneration,
        Phase::ExperimentalDesign,
        Phase::Validation,
        Phase::Synthesis,
    ];

    /// The static forward successor, ignoring the validation back-edge.
    /// `Synthesis` is terminal and has no successor.
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Phase::LiteratureReview => Some(Phase::CitationAnalysis),
            Phase::CitationAnalysis => Some(Phase::HypothesisGeneration),
            Phase::HypothesisGeneration => Some(Phase::ExperimentalDesign),
            Phase::ExperimentalDesign => Some(Phase::Validation),
            Phase::Validation => Some(Phase::Synthesis),
            Phase::Synthesis => None,
        }
    }

    /// Whether this phase ends the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Synthesis)
    }

    /// Worker roles that must run to completion within this phase.
    pub fn required_roles(&self) -> &'static [AgentRole] {
        match self {
            Phase::LiteratureReview => &[AgentRole::Retriever, AgentRole::Summarizer],
            Phase::CitationAnalysis => &[AgentRole::CitationMapper],
            Phase::HypothesisGeneration => &[AgentRole::HypothesisGenerator],
            Phase::ExperimentalDesign => &[AgentRole::ExperimentDesigner],
            Phase::Validation => &[AgentRole::Critic],
            Phase::Synthesis => &[AgentRole::Synthesizer],
        }
    }

    /// The phase authoritative for producing a given state field. Recovery
    /// downgrades to this phase when a required field cannot be restored
    /// from any checkpoint.
    pub fn owner_of(field: StateField) -> Phase {
        match field {
            StateField::ProcessedDocuments => Phase::LiteratureReview,
            StateField::Findings => Phase::LiteratureReview,
            StateField::Citations => Phase::CitationAnalysis,
            StateField::Hypotheses => Phase::HypothesisGeneration,
            StateField::ExperimentDesigns => Phase::ExperimentalDesign,
            StateField::ValidationOutcomes => Phase::Validation,
        }
    }

    /// Phases strictly before this one, newest first. Used when recovery
    /// searches backwards for a checkpoint containing a field.
    pub fn predecessors_desc(&self) -> Vec<Phase> {
        Phase::ALL
            .iter()
            .copied()
            .filter(|p| p < self)
            .rev()
            .collect()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::LiteratureReview => "literature_review",
            Phase::CitationAnalysis => "citation_analysis",
            Phase::HypothesisGeneration => "hypothesis_generation",
            Phase::ExperimentalDesign => "experimental_design",
            Phase::Validation => "validation",
            Phase::Synthesis => "synthesis",
        };
        write!(f, "{}", name)
    }
}

/// Compute the next phase after `phase` completes and validates.
///
/// `Synthesis` is entered only when the validation phase recorded a passing
/// outcome; otherwise control returns to `ExperimentalDesign` and the caller
/// increments the design loop counter. Returns `None` from the terminal phase.
pub fn route_next(phase: Phase, state: &WorkflowState) -> Option<Phase> {
    match phase {
        Phase::Validation => {
            if state.latest_validation_passed() {
                Some(Phase::Synthesis)
            } else {
                Some(Phase::ExperimentalDesign)
            }
        }
        other => other.successor(),
    }
}
