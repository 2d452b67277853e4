use uuid::Uuid;

use crate::timer::TimerService;

/// Runtime services injected into protocol machines.
///
/// Controllers never create their own identifiers, URIs or timers; they get
/// them from a provider owned by the application.
pub trait ResourceProvider: Send + Sync {
    /// A fresh, globally unique identifier.
    fn generate_id(&self) -> String;

    /// URI of the local endpoint.
    fn local_uri(&self) -> &str;

    /// Shared timer facility.
    fn timers(&self) -> &TimerService;
}

/// [`ResourceProvider`] backed by uuid v4 identifiers.
#[derive(Debug, Clone)]
pub struct DefaultResourceProvider {
    local_uri: String,
    timers: TimerService,
}

impl DefaultResourceProvider {
    /// Create a provider bound to the current tokio runtime.
    pub fn new(local_uri: impl Into<String>) -> Self {
        Self {
            local_uri: local_uri.into(),
            timers: TimerService::new(),
        }
    }

    /// Use an explicit timer service.
    pub fn with_timers(mut self, timers: TimerService) -> Self {
        self.timers = timers;
        self
    }
}

impl ResourceProvider for DefaultResourceProvider {
    fn generate_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn local_uri(&self) -> &str {
        &self.local_uri
    }

    fn timers(&self) -> &TimerService {
        &self.timers
    }
}
