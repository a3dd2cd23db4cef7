//! The phase state machine and the engine front end.
//!
//! `PhaseStateMachine` owns one workflow instance: it checkpoints on phase
//! entry, dispatches the phase's workers through the coordinator, gates
//! transitions on the validator, and routes faults through the recovery
//! manager. Only terminal faults stop the loop.
//!
//! `WorkflowEngine` manages running instances: start, observe, cancel, and
//! resume from a checkpoint. Observation goes through a watch channel the
//! machine publishes snapshots into, so `get_state` never contends with the
//! run loop.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent::coordinator::{AgentCoordinator, PhaseRunReport};
use crate::agent::WorkerRegistry;
use crate::checkpoint::{CheckpointId, CheckpointStore};
use crate::config::WorkflowConfig;
use crate::errors::{RecoveryFault, WorkflowFault};
use crate::events::{EventSink, WorkflowEvent};
use crate::interfaces::{InMemoryStorage, Storage};
use crate::memory::MemoryManager;
use crate::phase::{route_next, Phase};
use crate::recovery::{RecoveryAction, RecoveryManager};
use crate::state::{
    TransitionOutcome, TransitionRecord, TransitionJournal, WorkflowHealth, WorkflowState,
};
use crate::validator::StateValidator;

/// Opaque handle to one workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a caller needs to start a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowParams {
    pub query: String,
    pub config: WorkflowConfig,
}

impl WorkflowParams {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }
}

/// Read-only view of one workflow, published after every step.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub phase: Phase,
    pub health: WorkflowHealth,
    /// Kind tag of the fault that stopped the workflow, when one did.
    pub fault: Option<String>,
    /// Newest checkpoint at or before the current phase.
    pub last_checkpoint: Option<CheckpointId>,
    pub state: WorkflowState,
    pub recent_transitions: Vec<TransitionRecord>,
}

/// Result of one turn of the phase loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The loop should run again (advance, re-entry, or recovered fault).
    Continue,
    /// The terminal phase completed.
    Completed,
    /// A terminal fault stopped the workflow.
    Failed(RecoveryFault),
}

/// Drives one workflow instance through the phase graph.
pub struct PhaseStateMachine {
    config: WorkflowConfig,
    query: String,
    state: WorkflowState,
    validator: StateValidator,
    coordinator: AgentCoordinator,
    recovery: RecoveryManager,
    checkpoints: Arc<Mutex<CheckpointStore>>,
    memory: MemoryManager,
    journal: TransitionJournal,
    events: EventSink,
    health: WorkflowHealth,
    last_fault: Option<RecoveryFault>,
    /// Re-entry counts per phase, against `max_phase_attempts`.
    phase_attempts: HashMap<Phase, u32>,
    snapshot_tx: Option<watch::Sender<StateSnapshot>>,
}

impl PhaseStateMachine {
    pub fn new(
        config: WorkflowConfig,
        registry: Arc<WorkerRegistry>,
        storage: Box<dyn Storage>,
        query: &str,
    ) -> Self {
        let validator = StateValidator::from_config(&config);
        let coordinator =
            AgentCoordinator::new(registry, config.worker_timeout, config.phase_timeout);
        let recovery = RecoveryManager::new(config.max_recovery_retries);
        let memory = MemoryManager::new(config.working_memory_budget, storage);
        Self {
            config,
            query: query.to_string(),
            state: WorkflowState::new(),
            validator,
            coordinator,
            recovery,
            checkpoints: Arc::new(Mutex::new(CheckpointStore::new())),
            memory,
            journal: TransitionJournal::new(),
            events: EventSink::new(),
            health: WorkflowHealth::Healthy,
            last_fault: None,
            phase_attempts: HashMap::new(),
            snapshot_tx: None,
        }
    }

    /// Share a checkpoint store with the caller, enabling external resume.
    pub fn with_checkpoints(mut self, checkpoints: Arc<Mutex<CheckpointStore>>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Start from a restored state instead of a fresh one.
    pub fn with_state(mut self, state: WorkflowState) -> Self {
        self.state = state;
        self
    }

    pub fn set_snapshot_channel(&mut self, tx: watch::Sender<StateSnapshot>) {
        self.snapshot_tx = Some(tx);
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn health(&self) -> WorkflowHealth {
        self.health
    }

    pub fn journal(&self) -> &TransitionJournal {
        &self.journal
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Current view of the workflow, safe to hand to observers.
    pub fn snapshot(&self) -> StateSnapshot {
        let phase = self.state.phase;
        let last_checkpoint = {
            let store = self
                .checkpoints
                .lock()
                .expect("checkpoint store lock poisoned");
            std::iter::once(phase)
                .chain(phase.predecessors_desc())
                .find_map(|p| store.latest_for(p))
        };
        StateSnapshot {
            phase,
            health: self.health,
            fault: self
                .last_fault
                .as_ref()
                .map(|f| WorkflowFault::from(f.clone()).kind().to_string()),
            last_checkpoint,
            state: self.state.clone(),
            recent_transitions: self.journal.tail(10).to_vec(),
        }
    }

    /// Run the phase loop until the terminal phase completes or a terminal
    /// fault stops it. Only `RecoveryFault` crosses this boundary; every
    /// other fault kind is absorbed by recovery and journaled.
    pub async fn run(
        &mut self,
        cancel: watch::Receiver<bool>,
    ) -> Result<WorkflowState, RecoveryFault> {
        loop {
            let outcome = self.step(&cancel).await;
            self.publish_snapshot();
            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::Completed => return Ok(self.state.clone()),
                StepOutcome::Failed(fault) => return Err(fault),
            }
        }
    }

    /// One turn of the loop: checkpoint on first phase entry, run the
    /// phase's workers, then gate the transition on the completion predicate
    /// and the validator.
    pub async fn step(&mut self, cancel: &watch::Receiver<bool>) -> StepOutcome {
        let phase = self.state.phase;

        let created = {
            let mut store = self
                .checkpoints
                .lock()
                .expect("checkpoint store lock poisoned");
            if store.latest_for(phase).is_none() {
                Some(store.create(phase, &self.state))
            } else {
                None
            }
        };
        if let Some(id) = created {
            self.events
                .emit(WorkflowEvent::CheckpointCreated {
                    phase,
                    checkpoint_id: id.to_string(),
                })
                .await;
        }

        let run = self
            .coordinator
            .run_phase(
                phase,
                &self.query,
                Arc::new(self.state.clone()),
                self.memory.shared(),
                cancel.clone(),
            )
            .await;

        // The coordinator enforces both the per-worker and the phase
        // deadline, so its cleanup runs on every exit path.
        let fault: Option<WorkflowFault> = match run {
            Err(agent_fault) => Some(agent_fault.into()),
            Ok(report) => {
                self.absorb_report(report);
                None
            }
        };
        if let Some(fault) = fault {
            // Cancellation lands here too: the rollback preserves the
            // checkpointed state, and the still-raised cancel signal makes
            // every retry fault again until the attempt ceiling ends the
            // workflow.
            return self.handle_fault(fault).await;
        }

        if !self.validator.completion_met(phase, &self.state) {
            let attempts = self.phase_attempts.entry(phase).or_insert(0);
            *attempts += 1;
            let attempts = *attempts;
            if attempts > self.config.max_phase_attempts {
                // Out of re-entries; surface the unmet requirement as a
                // validation fault and let recovery take over.
                if let Err(fault) = self.validator.validate(&self.state, phase) {
                    return self.handle_fault(fault.into()).await;
                }
            }
            tracing::debug!(%phase, attempts, "phase output below threshold, re-entering");
            self.journal
                .append(TransitionRecord::new(phase, phase, TransitionOutcome::Reentered));
            self.events
                .emit(WorkflowEvent::PhaseTransition { from: phase, to: phase })
                .await;
            return StepOutcome::Continue;
        }

        // Validation gate. An in-place repair re-validates within the same
        // turn; re-running the phase first would let a sloppy worker
        // reintroduce the inconsistency indefinitely.
        if let Err(fault) = self.validator.validate(&self.state, phase) {
            match self.handle_fault(fault.into()).await {
                StepOutcome::Continue => {
                    if self.state.phase != phase
                        || !self.validator.completion_met(phase, &self.state)
                        || self.validator.validate(&self.state, phase).is_err()
                    {
                        return StepOutcome::Continue;
                    }
                }
                other => return other,
            }
        }

        // The phase is complete; its descriptors and counters are dropped.
        self.recovery.note_advanced(phase);
        self.phase_attempts.remove(&phase);
        self.state.active_roles.clear();
        self.state.agent_statuses.clear();

        if phase.is_terminal() {
            self.memory
                .record_episode(&format!("workflow completed at {}", phase), 1);
            tracing::info!(%phase, "workflow completed");
            return StepOutcome::Completed;
        }
        let Some(next) = route_next(phase, &self.state) else {
            return StepOutcome::Completed;
        };

        if next < phase {
            // The single back-edge: validation did not pass, return to
            // experimental design, bounded by the loop ceiling.
            self.state.design_loop_count += 1;
            if self.state.design_loop_count > self.config.design_loop_ceiling {
                let fault = RecoveryFault::ExhaustedRetries {
                    phase,
                    attempts: self.state.design_loop_count,
                };
                return self.fail(fault).await;
            }
            tracing::info!(
                loop_count = self.state.design_loop_count,
                "validation did not pass, returning to experimental design"
            );
        }

        self.state.phase = next;
        self.state.touch();
        self.journal
            .append(TransitionRecord::new(phase, next, TransitionOutcome::Advanced));
        self.events
            .emit(WorkflowEvent::PhaseTransition { from: phase, to: next })
            .await;
        self.memory
            .record_episode(&format!("advanced from {} to {}", phase, next), 1);
        StepOutcome::Continue
    }

    fn absorb_report(&mut self, report: PhaseRunReport) {
        let phase = self.state.phase;
        for delta in report.deltas {
            delta.apply(&mut self.state);
        }
        self.state.active_roles = phase.required_roles().iter().copied().collect();
        for descriptor in &report.descriptors {
            self.state
                .agent_statuses
                .insert(descriptor.id.clone(), descriptor.status);
        }
        for role in &report.retried_roles {
            tracing::debug!(%role, "worker recovered via in-place retry");
        }
        self.memory.remember(
            &format!(
                "phase {} cycle folded {} worker contributions",
                phase,
                report.descriptors.len()
            ),
            8,
        );
    }

    async fn handle_fault(&mut self, fault: WorkflowFault) -> StepOutcome {
        let phase = self.state.phase;
        tracing::warn!(%phase, kind = fault.kind(), %fault, "fault raised");
        self.journal.append(TransitionRecord::new(
            phase,
            phase,
            TransitionOutcome::Faulted {
                kind: fault.kind().to_string(),
            },
        ));
        self.events
            .emit(WorkflowEvent::FaultRaised {
                phase,
                kind: fault.kind().to_string(),
            })
            .await;

        let result = {
            let store = self
                .checkpoints
                .lock()
                .expect("checkpoint store lock poisoned");
            self.recovery.recover(&fault, &mut self.state, &store)
        };
        match result {
            Ok(action) => {
                self.health = WorkflowHealth::Degraded;
                let (outcome, tag, to) = match &action {
                    RecoveryAction::FieldRestored { .. } => {
                        (TransitionOutcome::Repaired, "field_restored", phase)
                    }
                    RecoveryAction::Repaired { .. } => {
                        (TransitionOutcome::Repaired, "repaired", phase)
                    }
                    RecoveryAction::Downgraded { to } => {
                        (TransitionOutcome::Downgraded, "downgraded", *to)
                    }
                    RecoveryAction::RolledBack { to } => {
                        (TransitionOutcome::RolledBack, "rolled_back", *to)
                    }
                };
                self.journal
                    .append(TransitionRecord::new(phase, to, outcome));
                self.events
                    .emit(WorkflowEvent::RecoveryAttempted {
                        phase,
                        action: tag.to_string(),
                    })
                    .await;
                StepOutcome::Continue
            }
            Err(terminal) => self.fail(terminal).await,
        }
    }

    async fn fail(&mut self, fault: RecoveryFault) -> StepOutcome {
        let phase = self.state.phase;
        let kind = WorkflowFault::from(fault.clone()).kind();
        tracing::error!(%phase, kind, %fault, "terminal fault, stopping workflow");
        self.journal.append(TransitionRecord::new(
            phase,
            phase,
            TransitionOutcome::Faulted {
                kind: kind.to_string(),
            },
        ));
        self.events
            .emit(WorkflowEvent::FaultRaised {
                phase,
                kind: kind.to_string(),
            })
            .await;
        self.health = WorkflowHealth::Failed;
        self.last_fault = Some(fault.clone());
        StepOutcome::Failed(fault)
    }

    fn publish_snapshot(&self) {
        if let Some(tx) = &self.snapshot_tx {
            tx.send_replace(self.snapshot());
        }
    }
}

struct WorkflowEntry {
    params: WorkflowParams,
    cancel_tx: watch::Sender<bool>,
    snapshot_rx: watch::Receiver<StateSnapshot>,
    checkpoints: Arc<Mutex<CheckpointStore>>,
    handle: Option<JoinHandle<Result<WorkflowState, RecoveryFault>>>,
}

/// Starts, observes, cancels, and resumes workflow instances. Each instance
/// runs as a spawned task over its own state machine.
pub struct WorkflowEngine {
    registry: Arc<WorkerRegistry>,
    storage_factory: Box<dyn Fn() -> Box<dyn Storage> + Send + Sync>,
    events: EventSink,
    workflows: HashMap<WorkflowId, WorkflowEntry>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            storage_factory: Box::new(|| Box::new(InMemoryStorage::new())),
            events: EventSink::new(),
            workflows: HashMap::new(),
        }
    }

    /// Replace the default in-memory long-term store backing each workflow.
    pub fn with_storage_factory(
        mut self,
        factory: impl Fn() -> Box<dyn Storage> + Send + Sync + 'static,
    ) -> Self {
        self.storage_factory = Box::new(factory);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Start a new workflow instance and return its handle.
    pub fn start_workflow(&mut self, params: WorkflowParams) -> WorkflowId {
        let id = WorkflowId::generate();
        let checkpoints = Arc::new(Mutex::new(CheckpointStore::new()));
        let entry = self.spawn(id, params, checkpoints, WorkflowState::new());
        self.workflows.insert(id, entry);
        id
    }

    fn spawn(
        &self,
        id: WorkflowId,
        params: WorkflowParams,
        checkpoints: Arc<Mutex<CheckpointStore>>,
        state: WorkflowState,
    ) -> WorkflowEntry {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut machine = PhaseStateMachine::new(
            params.config.clone(),
            Arc::clone(&self.registry),
            (self.storage_factory)(),
            &params.query,
        )
        .with_checkpoints(Arc::clone(&checkpoints))
        .with_events(self.events.clone())
        .with_state(state);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        machine.set_snapshot_channel(snapshot_tx);

        tracing::info!(workflow_id = %id, query = %params.query, "workflow started");
        let handle = tokio::spawn(async move { machine.run(cancel_rx).await });
        WorkflowEntry {
            params,
            cancel_tx,
            snapshot_rx,
            checkpoints,
            handle: Some(handle),
        }
    }

    /// The latest published snapshot for a workflow, or `None` for an
    /// unknown id.
    pub fn get_state(&self, id: WorkflowId) -> Option<StateSnapshot> {
        self.workflows
            .get(&id)
            .map(|entry| entry.snapshot_rx.borrow().clone())
    }

    /// Signal cancellation. Returns whether the id was known; delivery to
    /// in-flight workers is asynchronous.
    pub fn cancel(&self, id: WorkflowId) -> bool {
        match self.workflows.get(&id) {
            Some(entry) => {
                tracing::info!(workflow_id = %id, "cancelling workflow");
                entry.cancel_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Await a workflow's final result. Returns `None` for an unknown id, a
    /// result already consumed, or an aborted task.
    pub async fn wait(&mut self, id: WorkflowId) -> Option<Result<WorkflowState, RecoveryFault>> {
        let entry = self.workflows.get_mut(&id)?;
        let handle = entry.handle.take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!(workflow_id = %id, error = %e, "workflow task aborted");
                None
            }
        }
    }

    /// Manually restart a stopped workflow from one of its checkpoints. The
    /// prior run is cancelled; the new run starts from the snapshotted state
    /// with fresh recovery counters.
    pub fn resume(&mut self, id: WorkflowId, checkpoint_id: CheckpointId) -> anyhow::Result<()> {
        let (params, checkpoints, restored) = {
            let entry = self
                .workflows
                .get_mut(&id)
                .ok_or_else(|| anyhow!("unknown workflow {id}"))?;
            entry.cancel_tx.send_replace(true);
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
            let restored = {
                let store = entry
                    .checkpoints
                    .lock()
                    .expect("checkpoint store lock poisoned");
                store
                    .restore(checkpoint_id)
                    .ok_or_else(|| anyhow!("checkpoint {checkpoint_id} not found for workflow {id}"))?
            };
            (
                entry.params.clone(),
                Arc::clone(&entry.checkpoints),
                restored,
            )
        };

        tracing::info!(workflow_id = %id, %checkpoint_id, "resuming workflow from checkpoint");
        let entry = self.spawn(id, params, checkpoints, restored);
        self.workflows.insert(id, entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::agent::{AgentRole, AgentTask, Worker};
    use crate::errors::AgentFault;
    use crate::state::{
        Citation, Document, ExperimentDesign, Finding, Hypothesis, StateDelta, ValidationOutcome,
    };

    /// Produces plausible output for any role, keyed off the snapshot so
    /// repeated cycles generate fresh ids.
    struct StubWorker {
        role: AgentRole,
        docs_per_cycle: usize,
        critic_passes: bool,
    }

    impl StubWorker {
        fn for_role(role: AgentRole) -> Self {
            Self {
                role,
                docs_per_cycle: 3,
                critic_passes: true,
            }
        }
    }

    #[async_trait]
    impl Worker for StubWorker {
        fn role(&self) -> AgentRole {
            self.role
        }

        async fn execute(&self, task: AgentTask) -> Result<StateDelta, AgentFault> {
            let snapshot = &task.snapshot;
            let mut delta = StateDelta::default();
            match self.role {
                AgentRole::Retriever => {
                    let base = snapshot.processed_documents.len();
                    for i in 0..self.docs_per_cycle {
                        delta
                            .documents
                            .push(Document::new(&format!("d{}", base + i), "Paper"));
                    }
                }
                AgentRole::Summarizer => {
                    delta.findings.push(Finding {
                        id: format!("f{}", snapshot.findings.len()),
                        summary: "observed effect".into(),
                        document_ids: Vec::new(),
                    });
                }
                AgentRole::CitationMapper => {
                    if snapshot.processed_documents.len() >= 2 {
                        delta.citations.push(Citation::new(
                            &snapshot.processed_documents[0].id,
                            &snapshot.processed_documents[1].id,
                        ));
                    }
                }
                AgentRole::HypothesisGenerator => {
                    let base = snapshot.hypotheses.len();
                    for i in 0..3 {
                        delta
                            .hypotheses
                            .push(Hypothesis::new(&format!("h{}", base + i), "X causes Y"));
                    }
                }
                AgentRole::ExperimentDesigner => {
                    if let Some(hypothesis) = snapshot.hypotheses.first() {
                        delta.experiment_designs.push(ExperimentDesign::new(
                            &format!("e{}", snapshot.experiment_designs.len()),
                            &hypothesis.id,
                            "randomized trial",
                        ));
                    }
                }
                AgentRole::Critic => {
                    if let Some(hypothesis) = snapshot.hypotheses.first() {
                        let outcome = if self.critic_passes {
                            ValidationOutcome::passed(&hypothesis.id)
                        } else {
                            ValidationOutcome::failed(&hypothesis.id, "no effect found")
                        };
                        delta.validation_outcomes.push(outcome);
                    }
                }
                AgentRole::Synthesizer => {}
            }
            Ok(delta)
        }
    }

    fn full_registry() -> Arc<WorkerRegistry> {
        let mut registry = WorkerRegistry::new();
        for role in [
            AgentRole::Retriever,
            AgentRole::Summarizer,
            AgentRole::CitationMapper,
            AgentRole::HypothesisGenerator,
            AgentRole::ExperimentDesigner,
            AgentRole::Critic,
            AgentRole::Synthesizer,
        ] {
            registry.register(Arc::new(StubWorker::for_role(role)));
        }
        Arc::new(registry)
    }

    fn machine_with(registry: Arc<WorkerRegistry>, config: WorkflowConfig) -> PhaseStateMachine {
        PhaseStateMachine::new(config, registry, Box::new(InMemoryStorage::new()), "graphene")
    }

    // ==================== state machine ====================

    #[tokio::test]
    async fn test_full_pipeline_runs_to_synthesis() {
        let mut machine = machine_with(full_registry(), WorkflowConfig::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let state = machine.run(cancel_rx).await.unwrap();
        assert_eq!(state.phase, Phase::Synthesis);
        assert_eq!(machine.health(), WorkflowHealth::Healthy);
        assert!(state.processed_documents.len() >= 5);
        assert!(state.hypotheses.len() >= 3);
        assert!(state.latest_validation_passed());
        assert_eq!(machine.journal().fault_count(), 0);
    }

    #[tokio::test]
    async fn test_insufficient_documents_reenters_phase() {
        let registry = Arc::new(
            WorkerRegistry::new()
                .with_worker(Arc::new(StubWorker::for_role(AgentRole::Retriever)))
                .with_worker(Arc::new(StubWorker::for_role(AgentRole::Summarizer))),
        );
        let mut machine = machine_with(registry, WorkflowConfig::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        // 3 documents per cycle against a threshold of 5
        let outcome = machine.step(&cancel_rx).await;
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(machine.state().phase, Phase::LiteratureReview);
        assert_eq!(machine.state().processed_documents.len(), 3);
        let last = machine.journal().records().last().unwrap();
        assert_eq!(last.outcome, TransitionOutcome::Reentered);

        // The second cycle crosses the threshold and advances
        let outcome = machine.step(&cancel_rx).await;
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(machine.state().phase, Phase::CitationAnalysis);
        let last = machine.journal().records().last().unwrap();
        assert_eq!(last.outcome, TransitionOutcome::Advanced);
    }

    #[tokio::test]
    async fn test_failed_validation_loops_back_to_design() {
        let mut registry = WorkerRegistry::new();
        for role in [
            AgentRole::Retriever,
            AgentRole::Summarizer,
            AgentRole::CitationMapper,
            AgentRole::HypothesisGenerator,
            AgentRole::ExperimentDesigner,
            AgentRole::Synthesizer,
        ] {
            registry.register(Arc::new(StubWorker::for_role(role)));
        }
        registry.register(Arc::new(StubWorker {
            role: AgentRole::Critic,
            docs_per_cycle: 3,
            critic_passes: false,
        }));

        let config = WorkflowConfig::default().with_design_loop_ceiling(2);
        let mut machine = machine_with(Arc::new(registry), config);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        // The critic never passes, so the run exhausts the design loop
        let err = machine.run(cancel_rx).await.unwrap_err();
        assert!(matches!(
            err,
            RecoveryFault::ExhaustedRetries {
                phase: Phase::Validation,
                ..
            }
        ));
        assert_eq!(machine.health(), WorkflowHealth::Failed);
        assert!(machine.state().design_loop_count > 2);
        // The back-edge was taken at least once
        assert!(machine
            .journal()
            .records()
            .iter()
            .any(|r| r.from_phase == Phase::Validation
                && r.to_phase == Phase::ExperimentalDesign
                && r.outcome == TransitionOutcome::Advanced));
    }

    #[tokio::test]
    async fn test_empty_phase_output_exhausts_and_fails() {
        // A retriever that never produces anything
        struct EmptyWorker(AgentRole);
        #[async_trait]
        impl Worker for EmptyWorker {
            fn role(&self) -> AgentRole {
                self.0
            }
            async fn execute(&self, _task: AgentTask) -> Result<StateDelta, AgentFault> {
                Ok(StateDelta::default())
            }
        }

        let registry = Arc::new(
            WorkerRegistry::new()
                .with_worker(Arc::new(EmptyWorker(AgentRole::Retriever)))
                .with_worker(Arc::new(EmptyWorker(AgentRole::Summarizer))),
        );
        let config = WorkflowConfig::default()
            .with_max_phase_attempts(1)
            .with_max_recovery_retries(1);
        let mut machine = machine_with(registry, config);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = machine.run(cancel_rx).await.unwrap_err();
        assert!(matches!(
            err,
            RecoveryFault::ExhaustedRetries {
                phase: Phase::LiteratureReview,
                ..
            }
        ));
        assert_eq!(machine.health(), WorkflowHealth::Failed);
        assert!(machine.journal().fault_count() >= 2);
    }

    #[tokio::test]
    async fn test_degraded_health_after_recovered_fault() {
        let registry = Arc::new(
            WorkerRegistry::new()
                .with_worker(Arc::new(StubWorker::for_role(AgentRole::Retriever)))
                .with_worker(Arc::new(StubWorker::for_role(AgentRole::Summarizer))),
        );
        let config = WorkflowConfig::default()
            .with_min_documents(10)
            .with_max_phase_attempts(1);
        let mut machine = machine_with(registry, config);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        // Cycle 1 re-enters; cycle 2 exceeds the attempt ceiling and the
        // resulting fault is recovered by a downgrade
        assert_eq!(machine.step(&cancel_rx).await, StepOutcome::Continue);
        assert_eq!(machine.health(), WorkflowHealth::Healthy);
        assert_eq!(machine.step(&cancel_rx).await, StepOutcome::Continue);
        let outcome = machine.step(&cancel_rx).await;
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(machine.health(), WorkflowHealth::Degraded);
    }

    #[tokio::test]
    async fn test_snapshot_reports_checkpoint_and_journal() {
        let mut machine = machine_with(full_registry(), WorkflowConfig::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        machine.step(&cancel_rx).await;

        let snapshot = machine.snapshot();
        assert!(snapshot.last_checkpoint.is_some());
        assert!(!snapshot.recent_transitions.is_empty());
        assert!(snapshot.fault.is_none());
    }

    // ==================== engine ====================

    #[tokio::test]
    async fn test_engine_runs_workflow_to_completion() {
        let mut engine = WorkflowEngine::new(full_registry());
        let id = engine.start_workflow(WorkflowParams::new("graphene"));

        let state = engine.wait(id).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Synthesis);

        let snapshot = engine.get_state(id).unwrap();
        assert_eq!(snapshot.phase, Phase::Synthesis);
        assert_eq!(snapshot.health, WorkflowHealth::Healthy);
    }

    #[tokio::test]
    async fn test_engine_cancel_stops_workflow() {
        struct SleepyWorker(AgentRole);
        #[async_trait]
        impl Worker for SleepyWorker {
            fn role(&self) -> AgentRole {
                self.0
            }
            async fn execute(&self, _task: AgentTask) -> Result<StateDelta, AgentFault> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(StateDelta::default())
            }
        }

        let registry = Arc::new(
            WorkerRegistry::new()
                .with_worker(Arc::new(SleepyWorker(AgentRole::Retriever)))
                .with_worker(Arc::new(SleepyWorker(AgentRole::Summarizer))),
        );
        let config = WorkflowConfig::default()
            .with_worker_timeout(Duration::from_secs(3600))
            .with_phase_timeout(Duration::from_secs(3600));
        let mut engine = WorkflowEngine::new(registry);
        let id = engine.start_workflow(WorkflowParams::new("graphene").with_config(config));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.cancel(id));

        // Each retry after the cancel faults again until recovery exhausts
        let err = engine.wait(id).await.unwrap().unwrap_err();
        assert!(matches!(err, RecoveryFault::ExhaustedRetries { .. }));

        let snapshot = engine.get_state(id).unwrap();
        assert_eq!(snapshot.health, WorkflowHealth::Failed);
        assert_eq!(snapshot.fault.as_deref(), Some("exhausted_retries"));
        // The cancel itself is visible in the journal
        assert!(snapshot.recent_transitions.iter().any(
            |r| matches!(&r.outcome, TransitionOutcome::Faulted { kind } if kind == "cancelled")
        ));
    }

    #[tokio::test]
    async fn test_engine_resume_reruns_from_checkpoint() {
        let mut engine = WorkflowEngine::new(full_registry());
        let id = engine.start_workflow(WorkflowParams::new("graphene"));
        engine.wait(id).await.unwrap().unwrap();

        let checkpoint_id = engine.get_state(id).unwrap().last_checkpoint.unwrap();
        engine.resume(id, checkpoint_id).unwrap();

        let state = engine.wait(id).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Synthesis);
    }

    #[tokio::test]
    async fn test_engine_rejects_unknown_ids() {
        let mut engine = WorkflowEngine::new(full_registry());
        let id = engine.start_workflow(WorkflowParams::new("graphene"));
        engine.wait(id).await.unwrap().unwrap();

        let checkpoint_id = engine.get_state(id).unwrap().last_checkpoint.unwrap();
        let unknown = WorkflowId::generate();
        assert!(engine.get_state(unknown).is_none());
        assert!(!engine.cancel(unknown));
        assert!(engine.resume(unknown, checkpoint_id).is_err());
    }
}
