//! Application state for the session service.

use std::sync::Arc;

use common::config::AppConfig;
use common::errors::AppResult;
use session_core::{open_store, ClientOptions, CosmosConnector, SessionController};
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub controller: Arc<SessionController>,
    /// Cancelled when the process starts shutting down; ends event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Opens the connection store and starts the session controller.
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let store = open_store(&config.connection_store);
        let connector = Arc::new(CosmosConnector::new(ClientOptions::from_config(&config)));
        let controller = SessionController::new(store, connector).await?;
        Ok(Self {
            config,
            controller: Arc::new(controller),
            shutdown: CancellationToken::new(),
        })
    }
}
