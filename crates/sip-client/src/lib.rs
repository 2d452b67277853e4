//! # sigstack-sip-client
//!
//! Client-side SIP controllers for registration, event publication and
//! event subscription. Each controller is a state machine from
//! `sigstack-fsm-core` running on its own task; requests leave through a
//! [`RequestSender`] and responses come back through the shared
//! [`TransactionLayer`](sigstack_transaction_core::TransactionLayer).
//!
//! Message parsing and the wire transport are out of scope. The transport
//! owns the SIP stack and only exchanges the small [`OutgoingRequest`],
//! [`SipResponse`] and [`NotifyRequest`] views with the controllers.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sigstack_fsm_core::DefaultResourceProvider;
//! use sigstack_sip_client::{
//!     ClientContext, OutgoingRequest, RegisterConfig, RegisterController, RegistrationListener,
//!     RequestSender, SipClientResult,
//! };
//! use sigstack_transaction_core::TransactionLayer;
//!
//! struct Wire;
//! impl RequestSender for Wire {
//!     fn send_request(&self, request: OutgoingRequest) -> SipClientResult<()> {
//!         println!("{} {}", request.method, request.request_uri);
//!         Ok(())
//!     }
//! }
//!
//! struct Log;
//! impl RegistrationListener for Log {}
//!
//! # async fn example() -> SipClientResult<()> {
//! let ctx = ClientContext::new(
//!     Arc::new(Wire),
//!     TransactionLayer::with_defaults("sip"),
//!     Arc::new(DefaultResourceProvider::new("sip:alice@example.com")),
//! );
//! let controller = RegisterController::start(RegisterConfig::new("sip:example.com"), ctx, Arc::new(Log))?;
//! controller.register()?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod publish;
pub mod register;
pub mod subscribe;

pub use auth::{Credentials, DigestChallenge};
pub use config::{PublishConfig, RegisterConfig, SubscribeConfig};
pub use context::ClientContext;
pub use error::{SipClientError, SipClientResult};
pub use message::{Method, NotifyRequest, OutgoingRequest, RequestSender, SipResponse, SubscriptionState};
pub use publish::{PublicationListener, PublishController, PublishSignal, PublishState};
pub use register::{RegisterController, RegisterSignal, RegisterState, RegistrationFailure, RegistrationListener};
pub use subscribe::{SubscribeController, SubscribeSignal, SubscribeState, SubscriptionListener, TerminatedReason};
