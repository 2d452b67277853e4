use std::ops::Range;

use bytes::Bytes;
use sigstack_fsm_core::SignalSender;
use tracing::debug;

use crate::error::{MsrpError, Result};
use crate::message::{ByteRange, Continuation, MsrpRequest, ParticipantId};
use crate::participant::ParticipantSignal;

/// Splits outbound messages into SEND chunks and queues them on a
/// participant.
///
/// Chunks are posted all at once; the participant transmits them one at a
/// time, each waiting for the response to the previous one.
#[derive(Debug, Clone)]
pub struct MsrpSender {
    participant: ParticipantId,
    sender: SignalSender<ParticipantSignal>,
    max_chunk_size: usize,
}

impl MsrpSender {
    pub fn new(participant: ParticipantId, sender: SignalSender<ParticipantSignal>, max_chunk_size: usize) -> Self {
        Self {
            participant,
            sender,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Queue `body` as message `message_id`. Returns the number of chunks.
    ///
    /// The message id doubles as the state id reported back through
    /// `response_received` and `abort_sending_msg`.
    pub fn send_message(&self, message_id: &str, content_type: &str, body: impl Into<Bytes>) -> Result<usize> {
        let body = body.into();
        let total = body.len() as u64;
        let ranges = chunk_ranges(body.len(), self.max_chunk_size);
        let count = ranges.len();

        for (i, range) in ranges.into_iter().enumerate() {
            let continuation = if i + 1 == count {
                Continuation::Complete
            } else {
                Continuation::More
            };
            let byte_range = ByteRange::new(range.start as u64 + 1, Some(range.end as u64), Some(total));
            let request = MsrpRequest::send(message_id, content_type, byte_range, continuation, body.slice(range));
            if !self.sender.send(ParticipantSignal::send_request(request, message_id)) {
                return Err(MsrpError::Closed {
                    id: self.participant.to_string(),
                });
            }
        }
        debug!(participant = %self.participant, %message_id, bytes = total, chunks = count, "message queued");
        Ok(count)
    }
}

/// Body ranges of each chunk. An empty body still makes one (empty) chunk.
pub fn chunk_ranges(len: usize, max_chunk_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return vec![0..0];
    }
    let step = max_chunk_size.max(1);
    (0..len).step_by(step).map(|start| start..(start + step).min(len)).collect()
}
