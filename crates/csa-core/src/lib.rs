//! Shared types and error kinds for the agent controller workspace.

pub mod error;
pub mod types;

pub use error::AppError;
pub use types::{
    Action, AgentState, Artifacts, Decision, ErrorRecord, Intent, Observation, Phase, Plan,
    SideEffect, Step, StepResult, ToolDef,
};
