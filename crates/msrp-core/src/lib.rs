//! # sigstack-msrp-core
//!
//! Message Session Relay Protocol (RFC 4975) participants for chat and file
//! transfer sessions.
//!
//! An [`MsrpSession`] owns the application listener, a transaction layer
//! for SEND/response correlation and the participant state table. Each
//! [`Participant`] is a state machine bound to one connection:
//!
//! - outbound messages are split into SEND chunks by an [`MsrpSender`] and
//!   transmitted one at a time,
//! - inbound chunks are reassembled into an application-provided
//!   [`ContentStore`], tolerating duplicates, gaps and out-of-order ranges,
//! - message metadata is read from the first chunk, including the CPIM
//!   wrapper of `message/cpim` bodies.
//!
//! Framing and sockets belong to the [`MsrpConnection`] implementation,
//! which feeds parsed requests and responses back through
//! [`Participant::request_received`] and [`Participant::response_received`].

pub mod config;
pub mod cpim;
pub mod error;
pub mod listener;
pub mod message;
pub mod metadata;
pub mod participant;
pub mod reassembly;
pub mod sender;

pub use config::MsrpConfig;
pub use cpim::CpimHeaders;
pub use error::{MsrpError, Result};
pub use listener::{MsrpConnection, MsrpSessionListener, SendingListener};
pub use message::{ByteRange, Continuation, MsrpMethod, MsrpRequest, MsrpResponse, ParticipantId};
pub use metadata::ReceivedMessageMetaData;
pub use participant::{MsrpSession, Participant, ParticipantSignal, ParticipantState};
pub use reassembly::{ChunkOffset, ContentStore, FinishedMessage, MemoryContentStore, Reassembler};
pub use sender::MsrpSender;
