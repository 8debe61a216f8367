//! Document-service client abstraction.
//!
//! The core only ever pulls data through the paged iterator protocol
//! described by [`DocumentClient`]. A feed is read one page at a time; it
//! has more results until a page comes back without a continuation.

mod auth;
mod cosmos;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use common::config::AppConfig;
use common::errors::AppResult;
use common::models::{ContainerRef, DatabaseRef};

pub use cosmos::CosmosClient;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2018-12-31";

/// One page read from a service feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage<T> {
    /// Items in service order.
    pub items: Vec<T>,
    /// Token for the next page; `None` when the feed is exhausted.
    pub continuation: Option<String>,
    /// Request units charged for this page.
    pub request_charge: f64,
}

/// Parameters of a document query.
#[derive(Debug, Clone, Copy)]
pub struct DocumentQuery<'a> {
    pub database_id: &'a str,
    pub container_id: &'a str,
    pub query: &'a str,
    /// Page size hint; `None` lets the service choose.
    pub max_item_count: Option<u32>,
}

/// Failures reported by the backing service or the transport to it.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Paged access to databases, containers and documents of one account.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Reads one page of the account's databases.
    async fn read_databases(
        &self,
        continuation: Option<String>,
    ) -> Result<FeedPage<DatabaseRef>, ServiceError>;

    /// Reads one page of the containers of `database_id`.
    async fn read_containers(
        &self,
        database_id: &str,
        continuation: Option<String>,
    ) -> Result<FeedPage<ContainerRef>, ServiceError>;

    /// Reads one page of a document query.
    async fn query_documents(
        &self,
        query: DocumentQuery<'_>,
        continuation: Option<String>,
    ) -> Result<FeedPage<Value>, ServiceError>;
}

/// Builds live clients from connection strings.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, connection_string: &str) -> AppResult<Arc<dyn DocumentClient>>;
}

/// Client construction settings.
///
/// Emulator mode is decided once from configuration; it accepts the local
/// emulator's self-signed certificate and talks HTTP/1.1 to the gateway.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub emulator: bool,
    pub request_timeout: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            emulator: config.emulator,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            emulator: false,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Connector producing [`CosmosClient`]s.
#[derive(Debug, Clone, Default)]
pub struct CosmosConnector {
    options: ClientOptions,
}

impl CosmosConnector {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ClientConnector for CosmosConnector {
    async fn connect(&self, connection_string: &str) -> AppResult<Arc<dyn DocumentClient>> {
        let client = CosmosClient::new(connection_string, &self.options)?;
        Ok(Arc::new(client))
    }
}

/// Reads a feed to the end and concatenates its pages.
///
/// Returns the items and the summed request charge. Any failing page fails
/// the whole read.
pub async fn drain_feed<T, F, Fut>(mut fetch: F) -> Result<(Vec<T>, f64), ServiceError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<FeedPage<T>, ServiceError>>,
{
    let mut items = Vec::new();
    let mut charge = 0.0;
    let mut continuation = None;
    loop {
        let page = fetch(continuation.take()).await?;
        items.extend(page.items);
        charge += page.request_charge;
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => return Ok((items, charge)),
        }
    }
}
