//! # sigstack
//!
//! Client-side SIP and MSRP signaling built on one state machine runtime.
//!
//! - [`fsm_core`] - signals, conditions, state tables and the mailbox runner
//! - [`transaction_core`] - request/response correlation with timeouts
//! - [`sip_client`] - REGISTER, PUBLISH and SUBSCRIBE controllers
//! - [`msrp_core`] - MSRP participants and message reassembly
//! - [`infra_common`] - logging, error context and TOML loading
//!
//! [`StackConfig`] gathers the settings of every component in one TOML
//! document.

pub mod config;

pub use config::StackConfig;

pub use sigstack_fsm_core as fsm_core;
pub use sigstack_infra_common as infra_common;
pub use sigstack_msrp_core as msrp_core;
pub use sigstack_sip_client as sip_client;
pub use sigstack_transaction_core as transaction_core;

/// Commonly used types
pub mod prelude {
    pub use crate::StackConfig;
    pub use sigstack_fsm_core::{DefaultResourceProvider, ResourceProvider, TimerService};
    pub use sigstack_msrp_core::{
        MsrpConnection, MsrpSender, MsrpSession, MsrpSessionListener, Participant, ParticipantId, SendingListener,
    };
    pub use sigstack_sip_client::{
        ClientContext, PublicationListener, PublishController, RegisterController, RegistrationListener,
        RequestSender, SubscribeController, SubscriptionListener,
    };
    pub use sigstack_transaction_core::TransactionLayer;
}
