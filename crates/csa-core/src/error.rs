#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider '{provider}' unreachable at {host}: {message}")]
    ProviderUnavailable {
        provider: String,
        host: String,
        message: String,
    },

    #[error("planning failed: {0}")]
    PlanningFailed(String),

    #[error("tool '{tool}' rejected: {reason}")]
    ToolRejected { tool: String, reason: String },

    #[error("execution of step {step_id} failed: {message}")]
    ExecutionFailure { step_id: i64, message: String },

    #[error("stagnation detected: {0}")]
    StagnationDetected(String),

    #[error("safety violation: {0}")]
    SafetyViolation(String),

    #[error("hard stop: {reason} (cycle {cycle}, last error: {last_error_signature})")]
    HardStop {
        reason: String,
        cycle: u32,
        last_error_signature: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    /// Maps a terminal error to the process exit code contract in spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::ProviderUnavailable { .. } => 2,
            AppError::PlanningFailed(_)
            | AppError::StagnationDetected(_)
            | AppError::HardStop { .. } => 3,
            AppError::SafetyViolation(_) | AppError::ToolRejected { .. } => 4,
            AppError::ExecutionFailure { .. } => 5,
            AppError::Config(_) | AppError::Io { .. } => 1,
        }
    }
}
