//! Database client factory.
//!
//! Holds at most one live client for a connection string. The client is
//! built on first use and released exactly once, either by [`ClientFactory::dispose`]
//! or when the factory is dropped.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use common::errors::{AppError, AppResult};

use crate::client::{ClientConnector, DocumentClient};

enum ClientSlot {
    /// Not built yet.
    Empty,
    Ready(Arc<dyn DocumentClient>),
    Disposed,
}

/// Lazily builds and owns the client for one connection string.
pub struct ClientFactory {
    connection_string: String,
    connector: Arc<dyn ClientConnector>,
    // Held across construction so concurrent first calls build only once.
    slot: Mutex<ClientSlot>,
}

impl ClientFactory {
    pub fn new(connection_string: impl Into<String>, connector: Arc<dyn ClientConnector>) -> Self {
        Self {
            connection_string: connection_string.into(),
            connector,
            slot: Mutex::new(ClientSlot::Empty),
        }
    }

    /// Returns the client, building it on the first call.
    ///
    /// # Errors
    /// `AppError::Disposed` after [`dispose`](Self::dispose); the connector's
    /// `AppError::Connection` when construction fails. Construction is not
    /// retried here.
    pub async fn get_client(&self) -> AppResult<Arc<dyn DocumentClient>> {
        let mut slot = self.slot.lock().await;
        match &*slot {
            ClientSlot::Ready(client) => return Ok(Arc::clone(client)),
            ClientSlot::Disposed => return Err(AppError::Disposed),
            ClientSlot::Empty => {}
        }

        let client = self
            .connector
            .connect(&self.connection_string)
            .await
            .inspect_err(|e| {
                tracing::warn!(endpoint = %self.endpoint(), error = %e, "client construction failed")
            })?;
        tracing::info!(endpoint = %self.endpoint(), "client constructed");
        *slot = ClientSlot::Ready(Arc::clone(&client));
        Ok(client)
    }

    /// Releases the client. Later calls are no-ops.
    ///
    /// Returns `true` only for the call that performed the release.
    pub async fn dispose(&self) -> bool {
        let mut slot = self.slot.lock().await;
        release(&mut slot, self.endpoint())
    }

    pub async fn is_disposed(&self) -> bool {
        matches!(*self.slot.lock().await, ClientSlot::Disposed)
    }

    /// Account endpoint part of the connection string, safe to log.
    pub fn endpoint(&self) -> &str {
        endpoint_of(&self.connection_string)
    }
}

fn endpoint_of(connection_string: &str) -> &str {
    connection_string
        .split(';')
        .find_map(|segment| segment.trim().strip_prefix("AccountEndpoint="))
        .unwrap_or("<unknown>")
}

fn release(slot: &mut ClientSlot, endpoint: &str) -> bool {
    match std::mem::replace(slot, ClientSlot::Disposed) {
        ClientSlot::Disposed => false,
        ClientSlot::Ready(_) => {
            tracing::info!(endpoint, "client disposed");
            true
        }
        ClientSlot::Empty => {
            tracing::debug!(endpoint, "factory disposed before a client was built");
            true
        }
    }
}

impl Drop for ClientFactory {
    fn drop(&mut self) {
        let endpoint = endpoint_of(&self.connection_string);
        release(self.slot.get_mut(), endpoint);
    }
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}
