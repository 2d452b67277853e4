//! Error types for the SIP client controllers

use thiserror::Error;

/// Result type for SIP client operations
pub type SipClientResult<T> = Result<T, SipClientError>;

/// Errors that can occur in the SIP client
#[derive(Debug, Clone, Error)]
pub enum SipClientError {
    /// State machine error
    #[error("State machine error: {0}")]
    Fsm(#[from] sigstack_fsm_core::FsmError),

    /// Transaction layer error
    #[error("Transaction error: {0}")]
    Transaction(#[from] sigstack_transaction_core::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A WWW-Authenticate challenge could not be used
    #[error("Invalid authentication challenge: {reason}")]
    InvalidChallenge { reason: String },

    /// The transport refused a request
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The controller has already terminated
    #[error("Controller terminated: {id}")]
    Terminated { id: String },
}

impl SipClientError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid challenge error
    pub fn challenge(reason: impl Into<String>) -> Self {
        Self::InvalidChallenge {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}
