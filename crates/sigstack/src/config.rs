//! Configuration for a whole client stack

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sigstack_fsm_core::ResourceProvider;
use sigstack_infra_common::logging::log_welcome;
use sigstack_infra_common::{load_toml, parse_toml, setup_logging, ErrorExt, LoggingConfig, Result};
use sigstack_msrp_core::{MsrpConfig, MsrpSession, MsrpSessionListener};
use sigstack_sip_client::{ClientContext, PublishConfig, RegisterConfig, RequestSender, SubscribeConfig};
use sigstack_transaction_core::{TransactionConfig, TransactionLayer};
use tracing::info;

/// Main configuration
///
/// Every section is optional in TOML; absent sections and fields keep
/// their defaults.
///
/// ```toml
/// [logging]
/// level = "debug"
///
/// [register]
/// registrar_uri = "sip:example.com"
/// expires_secs = 600
///
/// [msrp]
/// max_chunk_size = 4096
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub logging: LoggingConfig,
    pub transaction: TransactionConfig,
    pub register: RegisterConfig,
    pub publish: PublishConfig,
    pub subscribe: SubscribeConfig,
    pub msrp: MsrpConfig,
}

impl StackConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        parse_toml(source).with_context("stack", "parse configuration")
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        load_toml(path).with_context("stack", format!("load {}", path.display()))
    }

    /// Install the global subscriber from the `[logging]` section
    pub fn init_logging(&self) -> Result<()> {
        setup_logging(&self.logging).with_context("stack", "init logging")?;
        log_welcome(&self.logging.app_name, env!("CARGO_PKG_VERSION"));
        Ok(())
    }

    /// Collaborators for the SIP controllers, with a transaction layer
    /// configured from the `[transaction]` section.
    pub fn client_context(
        &self,
        transport: Arc<dyn RequestSender>,
        resources: Arc<dyn ResourceProvider>,
    ) -> ClientContext {
        let transactions = TransactionLayer::new("sip", &self.transaction, resources.timers().clone());
        info!(local_uri = %resources.local_uri(), timeout_ms = self.transaction.default_timeout_ms, "SIP client context ready");
        ClientContext::new(transport, transactions, resources)
    }

    /// An MSRP session configured from the `[msrp]` section.
    pub fn msrp_session<L: MsrpSessionListener>(
        &self,
        resources: Arc<dyn ResourceProvider>,
        listener: Arc<L>,
    ) -> sigstack_msrp_core::Result<MsrpSession<L>> {
        MsrpSession::new(self.msrp.clone(), resources, listener)
    }
}
