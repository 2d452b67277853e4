//! # sigstack-transaction-core
//!
//! Transport-independent request/response correlation for the SIP and MSRP
//! clients.
//!
//! A controller starts a transaction when it hands a request to its
//! transport, and the transport reports the matching response through
//! [`TransactionLayer::on_response`]. If nothing arrives before the
//! deadline the layer reports [`TransactionOutcome::TimedOut`] instead.
//! Exactly one of the two reaches the [`TransactionUser`].
//!
//! Retransmission and interpretation of response codes belong to the
//! controllers, not to this crate.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use sigstack_transaction_core::{TransactionId, TransactionLayer, TransactionOutcome};
//!
//! # async fn example() -> sigstack_transaction_core::Result<()> {
//! let layer = TransactionLayer::<u16>::with_defaults("sip");
//! let id = TransactionId::generate();
//! let handle = layer.start_transaction(
//!     id.clone(),
//!     Some(Duration::from_secs(32)),
//!     |id: &TransactionId, outcome: TransactionOutcome<u16>| {
//!         println!("{} finished: {:?}", id, outcome);
//!     },
//! )?;
//!
//! // Later, from the transport:
//! layer.on_response(&id, 200);
//! assert!(!handle.is_pending());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod transaction;

pub use config::TransactionConfig;
pub use error::{Error, Result};
pub use transaction::{
    OutcomeSignal, SignalUser, TransactionHandle, TransactionId, TransactionLayer,
    TransactionOutcome, TransactionUser,
};
