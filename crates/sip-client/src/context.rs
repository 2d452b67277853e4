use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sigstack_fsm_core::{ResourceProvider, SignalSender, TimerService};
use sigstack_transaction_core::{OutcomeSignal, SignalUser, TransactionHandle, TransactionLayer};
use tracing::error;

use crate::error::SipClientResult;
use crate::message::{OutgoingRequest, RequestSender, SipResponse};

/// Collaborators shared by every SIP controller of one client.
#[derive(Clone)]
pub struct ClientContext {
    pub transport: Arc<dyn RequestSender>,
    pub transactions: TransactionLayer<SipResponse>,
    pub resources: Arc<dyn ResourceProvider>,
}

impl ClientContext {
    pub fn new(
        transport: Arc<dyn RequestSender>,
        transactions: TransactionLayer<SipResponse>,
        resources: Arc<dyn ResourceProvider>,
    ) -> Self {
        Self {
            transport,
            transactions,
            resources,
        }
    }

    pub fn timers(&self) -> &TimerService {
        self.resources.timers()
    }

    pub fn local_uri(&self) -> &str {
        self.resources.local_uri()
    }

    /// Open a transaction for `request` and hand it to the transport.
    ///
    /// The transaction is started first so a response racing the send is
    /// never lost; it is abandoned again if the transport refuses.
    pub(crate) fn send<S>(
        &self,
        request: OutgoingRequest,
        timeout: Duration,
        owner: &SignalSender<S>,
    ) -> SipClientResult<TransactionHandle<SipResponse>>
    where
        S: OutcomeSignal<SipResponse>,
    {
        let handle = self.transactions.start_transaction(
            request.transaction_id.clone(),
            Some(timeout),
            SignalUser::new(owner.clone()),
        )?;
        let method = request.method;
        if let Err(e) = self.transport.send_request(request) {
            error!(%method, transaction = %handle.id(), error = %e, "transport refused request");
            handle.cancel();
            return Err(e);
        }
        Ok(handle)
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("local_uri", &self.resources.local_uri())
            .field("transactions", &self.transactions)
            .finish()
    }
}
