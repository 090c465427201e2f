use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::ProxyError;
use crate::provider::{PredictionProvider, ReplicateClient};

/// Shared by every worker; immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub provider: Arc<dyn PredictionProvider>,
}

impl AppState {
    pub fn new(config: ServerConfig, provider: Arc<dyn PredictionProvider>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
        }
    }

    /// State backed by the Replicate HTTP API.
    pub fn replicate(config: ServerConfig) -> Result<Self, ProxyError> {
        let client = ReplicateClient::new(&config.api_base, &config.user_agent)?;
        Ok(Self::new(config, Arc::new(client)))
    }
}
