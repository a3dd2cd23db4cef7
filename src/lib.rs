pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod events;
pub mod interfaces;
pub mod memory;
pub mod phase;
pub mod recovery;
pub mod state;
pub mod validator;
pub mod workflow;

pub use config::WorkflowConfig;
pub use errors::{AgentFault, RecoveryFault, ValidationFault, WorkflowFault};
pub use phase::Phase;
pub use state::{WorkflowHealth, WorkflowState};
pub use workflow::{
    PhaseStateMachine, StateSnapshot, StepOutcome, WorkflowEngine, WorkflowId, WorkflowParams,
};
