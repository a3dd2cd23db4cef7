//! The shared workflow state and its record types.
//!
//! Exactly one `WorkflowState` exists per running workflow instance. It is
//! mutated only by the phase state machine and, through `StateDelta`s folded
//! in by the coordinator, by workers acting under its direction. Components
//! never hold independent copies; checkpoints are explicit snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::agent::{AgentRole, AgentStatus};
use crate::phase::Phase;

/// A normalized publication record, as delivered by the document source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub abstract_text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub year: Option<u16>,
}

impl Document {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            abstract_text: String::new(),
            source: String::new(),
            year: None,
        }
    }
}

/// A directed citation link between two processed documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Document doing the citing. Must exist in `processed_documents`.
    pub citing_id: String,
    /// Document being cited. Must exist in `processed_documents`.
    pub cited_id: String,
}

impl Citation {
    pub fn new(citing_id: &str, cited_id: &str) -> Self {
        Self {
            citing_id: citing_id.to_string(),
            cited_id: cited_id.to_string(),
        }
    }
}

/// A distilled observation extracted from the literature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub summary: String,
    /// Documents this finding is drawn from.
    #[serde(default)]
    pub document_ids: Vec<String>,
}

/// A candidate research hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub statement: String,
    #[serde(default)]
    pub supporting_findings: Vec<String>,
}

impl Hypothesis {
    pub fn new(id: &str, statement: &str) -> Self {
        Self {
            id: id.to_string(),
            statement: statement.to_string(),
            supporting_findings: Vec::new(),
        }
    }
}

/// An experiment plan targeting one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDesign {
    pub id: String,
    /// Hypothesis under test. Must exist in `hypotheses`.
    pub hypothesis_id: String,
    pub protocol: String,
}

impl ExperimentDesign {
    pub fn new(id: &str, hypothesis_id: &str, protocol: &str) -> Self {
        Self {
            id: id.to_string(),
            hypothesis_id: hypothesis_id.to_string(),
            protocol: protocol.to_string(),
        }
    }
}

/// Result of validating one hypothesis against its experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub hypothesis_id: String,
    pub passed: bool,
    #[serde(default)]
    pub notes: String,
    pub recorded_at: DateTime<Utc>,
}

impl ValidationOutcome {
    pub fn passed(hypothesis_id: &str) -> Self {
        Self {
            hypothesis_id: hypothesis_id.to_string(),
            passed: true,
            notes: String::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(hypothesis_id: &str, notes: &str) -> Self {
        Self {
            hypothesis_id: hypothesis_id.to_string(),
            passed: false,
            notes: notes.to_string(),
            recorded_at: Utc::now(),
        }
    }
}

/// Addressable collection fields of `WorkflowState`, used by the validator
/// requirements table and the recovery field-restore path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    ProcessedDocuments,
    Citations,
    Findings,
    Hypotheses,
    ExperimentDesigns,
    ValidationOutcomes,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateField::ProcessedDocuments => "processed_documents",
            StateField::Citations => "citations",
            StateField::Findings => "findings",
            StateField::Hypotheses => "hypotheses",
            StateField::ExperimentDesigns => "experiment_designs",
            StateField::ValidationOutcomes => "validation_outcomes",
        };
        write!(f, "{}", name)
    }
}

/// Workflow health as reported through `get_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowHealth {
    #[default]
    Healthy,
    /// Recovery has intervened at least once but the workflow is advancing.
    Degraded,
    /// A terminal fault was raised; the workflow is stopped.
    Failed,
}

/// The single authoritative state of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub phase: Phase,
    /// Bounds the validation <-> experimental-design cycle.
    pub design_loop_count: u32,
    pub processed_documents: Vec<Document>,
    pub citations: Vec<Citation>,
    pub findings: Vec<Finding>,
    pub hypotheses: Vec<Hypothesis>,
    pub experiment_designs: Vec<ExperimentDesign>,
    pub validation_outcomes: Vec<ValidationOutcome>,
    /// Roles with a live descriptor in the current phase.
    pub active_roles: BTreeSet<AgentRole>,
    /// Last observed status per agent id.
    pub agent_statuses: BTreeMap<String, AgentStatus>,
    pub last_activity: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            phase: Phase::LiteratureReview,
            design_loop_count: 0,
            processed_documents: Vec::new(),
            citations: Vec::new(),
            findings: Vec::new(),
            hypotheses: Vec::new(),
            experiment_designs: Vec::new(),
            validation_outcomes: Vec::new(),
            active_roles: BTreeSet::new(),
            agent_statuses: BTreeMap::new(),
            last_activity: Utc::now(),
        }
    }

    /// Cardinality of an addressable field.
    pub fn field_len(&self, field: StateField) -> usize {
        match field {
            StateField::ProcessedDocuments => self.processed_documents.len(),
            StateField::Citations => self.citations.len(),
            StateField::Findings => self.findings.len(),
            StateField::Hypotheses => self.hypotheses.len(),
            StateField::ExperimentDesigns => self.experiment_designs.len(),
            StateField::ValidationOutcomes => self.validation_outcomes.len(),
        }
    }

    /// Copy one addressable field from another state. Used by recovery when
    /// restoring a single field out of a checkpoint.
    pub fn copy_field_from(&mut self, other: &WorkflowState, field: StateField) {
        match field {
            StateField::ProcessedDocuments => {
                self.processed_documents = other.processed_documents.clone()
            }
            StateField::Citations => self.citations = other.citations.clone(),
            StateField::Findings => self.findings = other.findings.clone(),
            StateField::Hypotheses => self.hypotheses = other.hypotheses.clone(),
            StateField::ExperimentDesigns => {
                self.experiment_designs = other.experiment_designs.clone()
            }
            StateField::ValidationOutcomes => {
                self.validation_outcomes = other.validation_outcomes.clone()
            }
        }
        self.touch();
    }

    pub fn has_document(&self, id: &str) -> bool {
        self.processed_documents.iter().any(|d| d.id == id)
    }

    pub fn has_hypothesis(&self, id: &str) -> bool {
        self.hypotheses.iter().any(|h| h.id == id)
    }

    /// Whether the most recent validation outcome passed. With no outcomes
    /// recorded, validation has not passed.
    pub fn latest_validation_passed(&self) -> bool {
        self.validation_outcomes
            .last()
            .is_some_and(|outcome| outcome.passed)
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker's typed contribution to the shared state, folded in by the
/// coordinator under the state machine's lock after the worker completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    pub experiment_designs: Vec<ExperimentDesign>,
    #[serde(default)]
    pub validation_outcomes: Vec<ValidationOutcome>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
            && self.citations.is_empty()
            && self.findings.is_empty()
            && self.hypotheses.is_empty()
            && self.experiment_designs.is_empty()
            && self.validation_outcomes.is_empty()
    }

    /// Fold this delta into the shared state.
    pub fn apply(self, state: &mut WorkflowState) {
        state.processed_documents.extend(self.documents);
        state.citations.extend(self.citations);
        state.findings.extend(self.findings);
        state.hypotheses.extend(self.hypotheses);
        state.experiment_designs.extend(self.experiment_designs);
        state.validation_outcomes.extend(self.validation_outcomes);
        state.touch();
    }
}

/// Outcome tag of an attempted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Advanced,
    Reentered,
    Repaired,
    RolledBack,
    Downgraded,
    Faulted { kind: String },
}

/// Audit entry appended on every attempted transition, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub outcome: TransitionOutcome,
    pub timestamp: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(from_phase: Phase, to_phase: Phase, outcome: TransitionOutcome) -> Self {
        Self {
            from_phase,
            to_phase,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit log of transition attempts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionJournal {
    records: Vec<TransitionRecord>,
}

impl TransitionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: TransitionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The most recent `n` records, oldest first.
    pub fn tail(&self, n: usize) -> &[TransitionRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    /// Count of records whose outcome marks a fault.
    pub fn fault_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, TransitionOutcome::Faulted { .. }))
            .count()
    }
}
