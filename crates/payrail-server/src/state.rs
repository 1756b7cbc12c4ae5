use payrail::Orchestrator;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Key for verifying user bearer tokens
    pub auth_secret: Arc<Vec<u8>>,
    /// Bearer token for admin endpoints (None = disabled)
    pub admin_token: Option<String>,
    /// Bearer token for /metrics
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, auth_secret: Vec<u8>) -> Self {
        Self {
            orchestrator,
            auth_secret: Arc::new(auth_secret),
            admin_token: None,
            metrics_token: None,
            public_metrics: false,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn with_metrics(mut self, token: Option<String>, public: bool) -> Self {
        self.metrics_token = token;
        self.public_metrics = public;
        self
    }
}
