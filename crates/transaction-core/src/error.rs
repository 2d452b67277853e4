use thiserror::Error;

use crate::transaction::TransactionId;

/// A type alias for handling `Result`s with [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the transaction layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A transaction with this id is already outstanding.
    #[error("Transaction already exists: {0}")]
    TransactionExists(TransactionId),

    /// No outstanding transaction has this id.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),
}
