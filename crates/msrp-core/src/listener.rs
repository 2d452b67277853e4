use std::fmt;

use crate::error::Result;
use crate::message::{MsrpRequest, MsrpResponse, ParticipantId};
use crate::metadata::ReceivedMessageMetaData;
use crate::reassembly::ContentStore;

/// The wire side of one participant.
///
/// Calls must not block; the connection queues frames and reports
/// progress back through the participant (`bytes_sent`,
/// `response_received`, `request_received`, `close`).
pub trait MsrpConnection: Send + Sync + fmt::Debug {
    fn send_request(&self, request: &MsrpRequest) -> Result<()>;

    fn send_response(&self, response: &MsrpResponse) -> Result<()>;

    fn send_report(&self, report: &MsrpRequest) -> Result<()>;

    fn close(&self);
}

/// Application callbacks for a session.
///
/// Inbound messages are written into a store the application creates per
/// message; ownership of the store comes back with the final callback.
pub trait MsrpSessionListener: Send + Sync + 'static {
    type Store: ContentStore;

    /// Create the store for a new inbound message.
    fn new_message_collector(&self, meta: &ReceivedMessageMetaData) -> Self::Store;

    /// Progress on an inbound message: `received` distinct bytes out of
    /// `total`, when announced.
    fn more_bytes_received(&self, message_id: &str, received: u64, total: Option<u64>, store: &Self::Store) {
        let _ = (message_id, received, total, store);
    }

    fn message_received(&self, message_id: &str, meta: ReceivedMessageMetaData, store: Self::Store);

    /// The sender aborted the message, it timed out, or the participant
    /// closed before it completed.
    fn message_aborted(&self, message_id: &str, meta: ReceivedMessageMetaData, store: Self::Store) {
        let _ = (message_id, meta, store);
    }

    fn connected(&self) {}

    fn terminated(&self) {}

    /// Vet an inbound request. Anything but 2xx rejects it with that status.
    fn request_received(&self, participant: &ParticipantId, request: &MsrpRequest) -> u16 {
        let _ = (participant, request);
        200
    }

    /// Outcome of an outbound message: its final chunk was accepted, or
    /// some chunk failed with `status`.
    fn response_received(&self, msg_state_id: &str, participant: &ParticipantId, status: u16) {
        let _ = (msg_state_id, participant, status);
    }

    fn participant_activated(&self, participant: &ParticipantId) {
        let _ = participant;
    }

    fn participant_terminated(&self, participant: &ParticipantId) {
        let _ = participant;
    }
}

/// Flow control for the sending application.
pub trait SendingListener: Send + Sync {
    /// The message will not be delivered; its remaining chunks are dropped.
    fn abort_sending_msg(&self, msg_state_id: &str);

    /// The connection has drained the current chunk.
    fn ready_for_more(&self, msg_state_id: &str) {
        let _ = msg_state_id;
    }
}
