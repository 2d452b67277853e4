use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transaction layer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Timeout used when a transaction is started without one (64*T1).
    pub default_timeout_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 32_000,
        }
    }
}

impl TransactionConfig {
    /// The default timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
