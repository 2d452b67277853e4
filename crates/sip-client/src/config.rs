//! Controller settings.
//!
//! Every struct deserializes from TOML with all fields optional; missing
//! fields take the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::Credentials;

fn scaled(seconds: u32, ratio: f64) -> Duration {
    let ratio = if ratio > 0.0 && ratio <= 1.0 { ratio } else { 0.5 };
    Duration::from_secs_f64(f64::from(seconds.max(1)) * ratio)
}

/// REGISTER controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Registrar request URI.
    pub registrar_uri: String,
    /// Requested registration lifetime.
    pub expires_secs: u32,
    /// Fraction of the granted lifetime after which to refresh.
    pub refresh_ratio: f64,
    /// Challenges answered in a row before giving up.
    pub max_auth_attempts: u32,
    /// Retries after errors, timeouts and 412.
    pub max_retries: u32,
    /// First retry delay; doubles on every retry.
    pub retry_base_ms: u64,
    /// Upper bound for the retry delay.
    pub retry_max_ms: u64,
    /// Per-request transaction timeout.
    pub request_timeout_ms: u64,
    pub credentials: Option<Credentials>,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            registrar_uri: String::new(),
            expires_secs: 3600,
            refresh_ratio: 0.5,
            max_auth_attempts: 2,
            max_retries: 3,
            retry_base_ms: 1_000,
            retry_max_ms: 32_000,
            request_timeout_ms: 32_000,
            credentials: None,
        }
    }
}

impl RegisterConfig {
    pub fn new(registrar_uri: impl Into<String>) -> Self {
        Self {
            registrar_uri: registrar_uri.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_expires(mut self, expires_secs: u32) -> Self {
        self.expires_secs = expires_secs;
        self
    }

    pub fn refresh_after(&self, granted_secs: u32) -> Duration {
        scaled(granted_secs, self.refresh_ratio)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.retry_base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms.min(self.retry_max_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// PUBLISH controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Presentity URI the state is published for.
    pub target_uri: String,
    /// Event package, e.g. `presence`.
    pub event: String,
    pub expires_secs: u32,
    pub refresh_ratio: f64,
    /// Re-sends after 412 or 423 before giving up.
    pub max_retries: u32,
    pub request_timeout_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            target_uri: String::new(),
            event: "presence".to_string(),
            expires_secs: 3600,
            refresh_ratio: 0.8,
            max_retries: 3,
            request_timeout_ms: 32_000,
        }
    }
}

impl PublishConfig {
    pub fn new(target_uri: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            target_uri: target_uri.into(),
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn refresh_after(&self, granted_secs: u32) -> Duration {
        scaled(granted_secs, self.refresh_ratio)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// SUBSCRIBE controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeConfig {
    /// Resource URI subscribed to.
    pub target_uri: String,
    /// Event package, e.g. `presence` or `conference`.
    pub event: String,
    pub expires_secs: u32,
    pub refresh_ratio: f64,
    /// How long to wait for a NOTIFY after a 2xx to SUBSCRIBE.
    pub notify_wait_ms: u64,
    /// Slack added to the subscription lifetime before an active
    /// subscription without NOTIFY is declared dead.
    pub notify_grace_ms: u64,
    /// Re-sends after 423 before giving up.
    pub max_retries: u32,
    pub request_timeout_ms: u64,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            target_uri: String::new(),
            event: "presence".to_string(),
            expires_secs: 3600,
            refresh_ratio: 0.8,
            notify_wait_ms: 32_000,
            notify_grace_ms: 10_000,
            max_retries: 2,
            request_timeout_ms: 32_000,
        }
    }
}

impl SubscribeConfig {
    pub fn new(target_uri: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            target_uri: target_uri.into(),
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn refresh_after(&self, granted_secs: u32) -> Duration {
        scaled(granted_secs, self.refresh_ratio)
    }

    pub fn notify_wait(&self) -> Duration {
        Duration::from_millis(self.notify_wait_ms)
    }

    /// Deadline for the next NOTIFY of a subscription granted for `expires_secs`.
    pub fn expiry_deadline(&self, expires_secs: u32) -> Duration {
        Duration::from_secs(u64::from(expires_secs)) + Duration::from_millis(self.notify_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
