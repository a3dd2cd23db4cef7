//! Workflow configuration: thresholds, ceilings, timeouts, budgets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum processed documents to leave literature review.
const DEFAULT_MIN_DOCUMENTS: usize = 5;

/// Minimum hypotheses to leave hypothesis generation.
const DEFAULT_MIN_HYPOTHESES: usize = 3;

/// Re-entries allowed per phase on insufficient progress.
const DEFAULT_MAX_PHASE_ATTEMPTS: u32 = 5;

/// Recovery attempts allowed per phase before `ExhaustedRetries`.
const DEFAULT_MAX_RECOVERY_RETRIES: u32 = 3;

/// Trips around the validation -> experimental-design cycle.
const DEFAULT_DESIGN_LOOP_CEILING: u32 = 3;

/// Per-worker-task deadline.
const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 60;

/// Total phase duration ceiling.
const DEFAULT_PHASE_TIMEOUT_SECS: u64 = 300;

/// Working-memory token budget.
const DEFAULT_WORKING_MEMORY_BUDGET: usize = 4_000;

/// Configuration for one workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Completion threshold for `literature_review`.
    pub min_documents: usize,
    /// Completion threshold for `hypothesis_generation`.
    pub min_hypotheses: usize,
    /// Re-entry ceiling per phase when the completion predicate fails.
    pub max_phase_attempts: u32,
    /// Recovery attempt ceiling per phase.
    pub max_recovery_retries: u32,
    /// Ceiling on the validation <-> experimental-design cycle.
    pub design_loop_ceiling: u32,
    /// Per-worker-task timeout.
    #[serde(with = "duration_secs")]
    pub worker_timeout: Duration,
    /// Per-phase total duration ceiling.
    #[serde(with = "duration_secs")]
    pub phase_timeout: Duration,
    /// Token budget for the working memory tier.
    pub working_memory_budget: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            min_documents: DEFAULT_MIN_DOCUMENTS,
            min_hypotheses: DEFAULT_MIN_HYPOTHESES,
            max_phase_attempts: DEFAULT_MAX_PHASE_ATTEMPTS,
            max_recovery_retries: DEFAULT_MAX_RECOVERY_RETRIES,
            design_loop_ceiling: DEFAULT_DESIGN_LOOP_CEILING,
            worker_timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            phase_timeout: Duration::from_secs(DEFAULT_PHASE_TIMEOUT_SECS),
            working_memory_budget: DEFAULT_WORKING_MEMORY_BUDGET,
        }
    }
}

impl WorkflowConfig {
    pub fn with_min_documents(mut self, min: usize) -> Self {
        self.min_documents = min;
        self
    }

    pub fn with_min_hypotheses(mut self, min: usize) -> Self {
        self.min_hypotheses = min;
        self
    }

    pub fn with_max_phase_attempts(mut self, attempts: u32) -> Self {
        self.max_phase_attempts = attempts;
        self
    }

    pub fn with_max_recovery_retries(mut self, retries: u32) -> Self {
        self.max_recovery_retries = retries;
        self
    }

    pub fn with_design_loop_ceiling(mut self, ceiling: u32) -> Self {
        self.design_loop_ceiling = ceiling;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_working_memory_budget(mut self, budget: usize) -> Self {
        self.working_memory_budget = budget;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
