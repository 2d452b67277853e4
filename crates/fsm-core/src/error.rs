use thiserror::Error;

/// A type alias for handling `Result`s with [`FsmError`]
pub type Result<T> = std::result::Result<T, FsmError>;

/// Errors that can occur while building or running state machines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    /// The state table failed validation.
    #[error("Invalid state table '{table}': {}", .problems.join("; "))]
    InvalidTable {
        table: String,
        problems: Vec<String>,
    },

    /// An enter hook refused the move into a state.
    #[error("Cannot enter state {state}: {reason}")]
    Hook { state: String, reason: String },

    /// Waiting for a machine to reach a state took too long.
    #[error("Timed out waiting for machine '{0}'")]
    Timeout(String),

    /// The machine's runner task is gone.
    #[error("Machine '{0}' has stopped")]
    MachineStopped(String),

    /// The runner task panicked or was cancelled.
    #[error("Machine runner failed: {0}")]
    Runner(String),
}

impl FsmError {
    /// Build a [`FsmError::Hook`] for the given state.
    pub fn hook(state: impl std::fmt::Debug, reason: impl Into<String>) -> Self {
        FsmError::Hook {
            state: format!("{:?}", state),
            reason: reason.into(),
        }
    }
}
