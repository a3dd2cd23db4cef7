//! Reference worker for the literature-review retriever role, built on the
//! external `DocumentSource` collaborator. Other roles are supplied by the
//! embedding application through the worker registry.

use async_trait::async_trait;
use std::sync::Arc;

use super::{AgentRole, AgentTask, Worker};
use crate::errors::AgentFault;
use crate::interfaces::DocumentSource;
use crate::memory::SharedKey;
use crate::state::StateDelta;

/// Fetches publication records for the workflow query and contributes the
/// ones not already processed.
pub struct DocumentRetriever {
    source: Arc<dyn DocumentSource>,
}

impl DocumentRetriever {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Worker for DocumentRetriever {
    fn role(&self) -> AgentRole {
        AgentRole::Retriever
    }

    async fn execute(&self, task: AgentTask) -> Result<StateDelta, AgentFault> {
        let fetched = self
            .source
            .fetch(&task.query)
            .await
            .map_err(|e| AgentFault::Execution {
                agent_id: task.agent_id.clone(),
                role: self.role().to_string(),
                message: e.to_string(),
            })?;

        let documents: Vec<_> = fetched
            .into_iter()
            .filter(|d| !task.snapshot.has_document(&d.id))
            .collect();

        // Announce the batch so sibling workers in the same cycle can react
        // before the delta lands in the shared state.
        task.shared.put(
            &SharedKey::new(&task.agent_id, &task.context_id),
            serde_json::json!({ "retrieved": documents.len() }),
        );
        tracing::debug!(
            agent_id = %task.agent_id,
            count = documents.len(),
            "retriever fetched documents"
        );

        Ok(StateDelta {
            documents,
            ..Default::default()
        })
    }
}
