//! Error types for the MSRP core

use thiserror::Error;

/// Result type for MSRP operations
pub type Result<T> = std::result::Result<T, MsrpError>;

/// Errors that can occur in the MSRP core
#[derive(Debug, Error)]
pub enum MsrpError {
    /// State machine error
    #[error("State machine error: {0}")]
    Fsm(#[from] sigstack_fsm_core::FsmError),

    /// Transaction layer error
    #[error("Transaction error: {0}")]
    Transaction(#[from] sigstack_transaction_core::Error),

    /// A `Byte-Range` value that does not follow `start-end/total`
    #[error("Invalid byte range: {value}")]
    InvalidByteRange { value: String },

    /// A SEND carrying content without a `Message-ID`
    #[error("Request has no Message-ID")]
    MissingMessageId,

    /// The CPIM wrapper of a message could not be read
    #[error("Malformed CPIM: {reason}")]
    Cpim { reason: String },

    /// An inbound message reaches past the configured size limit
    #[error("Message too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    /// The application's content store refused a write
    #[error("Content store error: {message}")]
    Store { message: String },

    /// The connection refused to send
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The participant has already closed
    #[error("Participant closed: {id}")]
    Closed { id: String },
}

impl MsrpError {
    /// Create a CPIM error
    pub fn cpim(reason: impl Into<String>) -> Self {
        Self::Cpim {
            reason: reason.into(),
        }
    }

    /// Create a content store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}
