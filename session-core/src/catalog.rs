//! Catalog browser: databases and containers of the connected account.

use std::sync::Arc;

use common::errors::{AppError, AppResult};
use common::models::{ContainerRef, DatabaseRef};

use crate::client::{drain_feed, DocumentClient, ServiceError};

/// Lists the catalog through a shared client.
///
/// Listings read every page of the feed and keep the service's order.
/// A failure on any page discards what was already read.
pub struct CatalogBrowser {
    client: Arc<dyn DocumentClient>,
}

impl CatalogBrowser {
    pub fn new(client: Arc<dyn DocumentClient>) -> Self {
        Self { client }
    }

    /// Lists every database on the account.
    pub async fn list_databases(&self) -> AppResult<Vec<DatabaseRef>> {
        let (databases, charge) = drain_feed(|continuation| self.client.read_databases(continuation))
            .await
            .map_err(catalog_error)?;
        tracing::debug!(count = databases.len(), request_charge = charge, "databases listed");
        Ok(databases)
    }

    /// Lists every container of `database_id`.
    pub async fn list_containers(&self, database_id: &str) -> AppResult<Vec<ContainerRef>> {
        let (containers, charge) =
            drain_feed(|continuation| self.client.read_containers(database_id, continuation))
                .await
                .map_err(catalog_error)?;
        tracing::debug!(
            database = database_id,
            count = containers.len(),
            request_charge = charge,
            "containers listed"
        );
        Ok(containers)
    }
}

fn catalog_error(err: ServiceError) -> AppError {
    tracing::warn!(error = %err, "catalog listing failed");
    AppError::Catalog(err.to_string())
}
