//! Worker roles, descriptors, tasks, and the execution contract.
//!
//! Roles are capability-tagged and selected through the static
//! phase -> roles table in [`crate::phase`], not by runtime type inspection.
//! The coordinator in [`coordinator`] drives them.

pub mod coordinator;
pub mod retriever;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AgentFault;
use crate::memory::SharedMemory;
use crate::phase::Phase;
use crate::state::{StateDelta, WorkflowState};

/// The specialized worker roles the phases draw on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Retriever,
    Summarizer,
    CitationMapper,
    HypothesisGenerator,
    ExperimentDesigner,
    Critic,
    Synthesizer,
}

impl AgentRole {
    /// Declared capability tags for this role.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentRole::Retriever => &["search", "fetch", "normalize"],
            AgentRole::Summarizer => &["summarize", "extract_findings"],
            AgentRole::CitationMapper => &["parse_references", "link_citations"],
            AgentRole::HypothesisGenerator => &["synthesize_findings", "propose"],
            AgentRole::ExperimentDesigner => &["design_protocol"],
            AgentRole::Critic => &["evaluate", "falsify"],
            AgentRole::Synthesizer => &["compose_report"],
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentRole::Retriever => "retriever",
            AgentRole::Summarizer => "summarizer",
            AgentRole::CitationMapper => "citation_mapper",
            AgentRole::HypothesisGenerator => "hypothesis_generator",
            AgentRole::ExperimentDesigner => "experiment_designer",
            AgentRole::Critic => "critic",
            AgentRole::Synthesizer => "synthesizer",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle status of one worker within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Failed,
}

/// Identity and status of one worker instance. Created on first need for a
/// role in a phase; dropped when the phase completes or the worker fails
/// its retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub role: AgentRole,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
}

impl AgentDescriptor {
    pub fn for_role(role: AgentRole) -> Self {
        Self {
            id: format!("{}-{}", role, Uuid::new_v4().simple()),
            role,
            capabilities: role.capabilities().iter().map(|c| c.to_string()).collect(),
            status: AgentStatus::Idle,
        }
    }
}

/// The unit of work handed to one worker: the phase, a read-only snapshot of
/// the shared state, and the shared-memory channel for intermediate results.
#[derive(Clone)]
pub struct AgentTask {
    pub phase: Phase,
    pub role: AgentRole,
    pub agent_id: String,
    /// Identifies this coordinator cycle; shared-memory slots are scoped
    /// to it.
    pub context_id: String,
    /// The research query the workflow was started with.
    pub query: String,
    /// Read-only slice of the workflow state at dispatch time.
    pub snapshot: Arc<WorkflowState>,
    /// Channel for intermediate results between concurrent workers.
    pub shared: Arc<SharedMemory>,
}

/// The execution contract implemented independently per role. A worker
/// computes a typed contribution to the shared state; it never mutates
/// `WorkflowState` directly.
#[async_trait]
pub trait Worker: Send + Sync {
    fn role(&self) -> AgentRole;
    async fn execute(&self, task: AgentTask) -> Result<StateDelta, AgentFault>;
}

/// Role -> worker implementation table.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<AgentRole, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.role(), worker);
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn Worker>> {
        self.workers.get(&role).cloned()
    }

    pub fn has_role(&self, role: AgentRole) -> bool {
        self.workers.contains_key(&role)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
