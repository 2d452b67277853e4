use std::time::Duration;

use serde::{Deserialize, Serialize};

/// MSRP session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MsrpConfig {
    /// Largest body carried by one SEND chunk.
    pub max_chunk_size: usize,
    /// How long a chunk may wait for its response before counting as 408.
    pub transaction_timeout_ms: u64,
    /// Silence after which a partially received message is aborted.
    pub receive_timeout_ms: u64,
    /// Largest inbound message accepted, announced or not. Chunks reaching
    /// past it are answered with 413 and abort the message.
    pub max_message_size: u64,
}

impl Default for MsrpConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2048,
            transaction_timeout_ms: 30_000,
            receive_timeout_ms: 30_000,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl MsrpConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}
