//! The agent coordinator: concurrent dispatch of one worker per required
//! role, result collection, stall detection, and single in-place retry.
//!
//! Workers run as spawned tasks and post results asynchronously into an
//! mpsc channel; the coordinator blocks on that channel rather than
//! polling. A worker that produces nothing within the per-worker deadline
//! is marked failed and retried once in place, without involving the
//! recovery manager. A second failure escalates as an `AgentFault`. The
//! phase-level deadline is enforced here as well, so that expiry, cancel,
//! and success all release the cycle's shared-memory slots and abort any
//! in-flight tasks. An external cancel signal is routed to the caller as a
//! fault, never silently dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{AgentDescriptor, AgentRole, AgentStatus, AgentTask, Worker, WorkerRegistry};
use crate::errors::AgentFault;
use crate::memory::SharedMemory;
use crate::phase::Phase;
use crate::state::{StateDelta, WorkflowState};

/// What one coordinator cycle produced.
#[derive(Debug)]
pub struct PhaseRunReport {
    /// One contribution per completed worker, in completion order.
    pub deltas: Vec<StateDelta>,
    /// Final descriptors for every worker that ran.
    pub descriptors: Vec<AgentDescriptor>,
    /// Roles that failed once and succeeded on their in-place retry.
    pub retried_roles: Vec<AgentRole>,
}

/// Dispatches tasks to workers for the current phase and tracks liveness.
pub struct AgentCoordinator {
    registry: Arc<WorkerRegistry>,
    worker_timeout: Duration,
    phase_timeout: Duration,
}

impl AgentCoordinator {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        worker_timeout: Duration,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            worker_timeout,
            phase_timeout,
        }
    }

    /// Run all required workers for `phase` to completion, timeout, or
    /// cancellation.
    pub async fn run_phase(
        &self,
        phase: Phase,
        query: &str,
        snapshot: Arc<WorkflowState>,
        shared: Arc<SharedMemory>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PhaseRunReport, AgentFault> {
        let roles = phase.required_roles();
        let context_id = Uuid::new_v4().to_string();
        let (result_tx, mut result_rx) = mpsc::channel::<(AgentRole, Result<StateDelta, AgentFault>)>(
            roles.len().max(1),
        );

        let mut descriptors: HashMap<AgentRole, AgentDescriptor> = HashMap::new();
        let mut handles: HashMap<AgentRole, JoinHandle<()>> = HashMap::new();
        let mut workers: HashMap<AgentRole, Arc<dyn Worker>> = HashMap::new();
        let mut retried: HashSet<AgentRole> = HashSet::new();

        for &role in roles {
            let worker = self.registry.get(role).ok_or_else(|| AgentFault::Execution {
                agent_id: "unassigned".to_string(),
                role: role.to_string(),
                message: "no worker registered for role".to_string(),
            })?;
            workers.insert(role, Arc::clone(&worker));

            let mut descriptor = AgentDescriptor::for_role(role);
            descriptor.status = AgentStatus::Active;
            tracing::debug!(%phase, %role, agent_id = %descriptor.id, "dispatching worker");

            let task = AgentTask {
                phase,
                role,
                agent_id: descriptor.id.clone(),
                context_id: context_id.clone(),
                query: query.to_string(),
                snapshot: Arc::clone(&snapshot),
                shared: Arc::clone(&shared),
            };
            handles.insert(
                role,
                self.spawn_worker(worker, task, result_tx.clone()),
            );
            descriptors.insert(role, descriptor);
        }

        let mut deltas = Vec::new();
        let mut pending = roles.len();
        let mut succeeded_retries = Vec::new();

        let deadline = tokio::time::sleep(self.phase_timeout);
        tokio::pin!(deadline);

        // The coordinator holds one sender for retry dispatches, so recv()
        // can only yield worker messages; the loop exits on the pending
        // count.
        while pending > 0 {
            tokio::select! {
                () = &mut deadline => {
                    tracing::warn!(%phase, "phase deadline elapsed, aborting workers");
                    abort_all(&mut handles);
                    shared.clear_context(&context_id);
                    return Err(AgentFault::StalledPhase {
                        phase,
                        timeout_secs: self.phase_timeout.as_secs(),
                    });
                }
                message = result_rx.recv() => {
                    let Some((role, result)) = message else { break };
                    handles.remove(&role);

                    match result {
                        Ok(delta) => {
                            deltas.push(delta);
                            pending -= 1;
                            if retried.contains(&role) {
                                succeeded_retries.push(role);
                            }
                        }
                        Err(fault) => {
                            if let Some(descriptor) = descriptors.get_mut(&role) {
                                descriptor.status = AgentStatus::Failed;
                            }
                            if retried.insert(role) {
                                // First failure: retry once in place, with
                                // the worker reactivated for the attempt.
                                tracing::warn!(%phase, %role, %fault, "worker failed, retrying in place");
                                let worker = Arc::clone(&workers[&role]);
                                let task = AgentTask {
                                    phase,
                                    role,
                                    agent_id: descriptors[&role].id.clone(),
                                    context_id: context_id.clone(),
                                    query: query.to_string(),
                                    snapshot: Arc::clone(&snapshot),
                                    shared: Arc::clone(&shared),
                                };
                                if let Some(descriptor) = descriptors.get_mut(&role) {
                                    descriptor.status = AgentStatus::Active;
                                }
                                handles.insert(
                                    role,
                                    self.spawn_worker(worker, task, result_tx.clone()),
                                );
                            } else {
                                tracing::error!(%phase, %role, %fault, "worker failed after retry");
                                abort_all(&mut handles);
                                return Err(fault);
                            }
                        }
                    }
                }
                changed = cancel.changed() => {
                    let cancelled = changed.is_ok() && *cancel.borrow();
                    if cancelled || changed.is_err() {
                        tracing::warn!(%phase, "cancel signal received, aborting workers");
                        abort_all(&mut handles);
                        shared.clear_context(&context_id);
                        return Err(AgentFault::Cancelled { phase });
                    }
                }
            }
        }

        // Intermediate results have been folded; drop the exchange slots.
        shared.clear_context(&context_id);

        Ok(PhaseRunReport {
            deltas,
            descriptors: descriptors.into_values().collect(),
            retried_roles: succeeded_retries,
        })
    }

    fn spawn_worker(
        &self,
        worker: Arc<dyn Worker>,
        task: AgentTask,
        result_tx: mpsc::Sender<(AgentRole, Result<StateDelta, AgentFault>)>,
    ) -> JoinHandle<()> {
        let deadline = self.worker_timeout;
        tokio::spawn(async move {
            let role = task.role;
            let agent_id = task.agent_id.clone();
            let result = match tokio::time::timeout(deadline, worker.execute(task)).await {
                Ok(inner) => inner,
                Err(_) => Err(AgentFault::Stalled {
                    agent_id,
                    role: role.to_string(),
                    timeout_secs: deadline.as_secs(),
                }),
            };
            result_tx.send((role, result)).await.ok();
        })
    }

}

fn abort_all(handles: &mut HashMap<AgentRole, JoinHandle<()>>) {
    for (_, handle) in handles.drain() {
        handle.abort();
    }
}
