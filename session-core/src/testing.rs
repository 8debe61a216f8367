//! Scriptable in-memory service used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Notify, Semaphore};

use common::errors::{AppError, AppResult};
use common::models::{ContainerRef, DatabaseRef};

use crate::client::{ClientConnector, DocumentClient, DocumentQuery, FeedPage, ServiceError};

pub(crate) const ACCOUNT: &str =
    "AccountEndpoint=https://acct.documents.azure.com:443/;AccountKey=abc123==;";

pub(crate) const CATALOG_PAGE_SIZE: usize = 2;
pub(crate) const SERVICE_PAGE_SIZE: usize = 3;
pub(crate) const PAGE_CHARGE: f64 = 2.5;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedQuery {
    pub query: String,
    pub max_item_count: Option<u32>,
    pub continuation: Option<String>,
}

/// Fake account. Continuation tokens are stringified offsets.
#[derive(Default)]
pub(crate) struct FakeDocumentClient {
    databases: Mutex<Vec<DatabaseRef>>,
    containers: Mutex<HashMap<String, Vec<ContainerRef>>>,
    documents: Mutex<HashMap<(String, String), Vec<Value>>>,
    catalog_calls: AtomicUsize,
    fail_catalog_at: Mutex<Option<usize>>,
    query_failure: Mutex<Option<String>>,
    queries: Mutex<Vec<RecordedQuery>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDocumentClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_database(&self, id: &str) {
        self.databases.lock().unwrap().push(DatabaseRef::new(id));
        self.containers.lock().unwrap().entry(id.to_string()).or_default();
    }

    pub fn add_container(&self, database: &str, id: &str) {
        self.containers
            .lock()
            .unwrap()
            .entry(database.to_string())
            .or_default()
            .push(ContainerRef::new(id));
        self.documents
            .lock()
            .unwrap()
            .entry((database.to_string(), id.to_string()))
            .or_default();
    }

    /// Adds `count` documents `{ "id": "<n>", "n": n }` to a container.
    pub fn add_documents(&self, database: &str, container: &str, count: usize) {
        let mut documents = self.documents.lock().unwrap();
        let docs = documents
            .entry((database.to_string(), container.to_string()))
            .or_default();
        let start = docs.len();
        docs.extend((start..start + count).map(|n| json!({ "id": n.to_string(), "n": n })));
    }

    /// Makes the catalog read with this index (counted from now) fail.
    pub fn fail_catalog_at(&self, page: usize) {
        self.catalog_calls.store(0, Ordering::SeqCst);
        *self.fail_catalog_at.lock().unwrap() = Some(page);
    }

    pub fn fail_queries(&self, message: &str) {
        *self.query_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Blocks bounded (page-limited) fetches until permits are added.
    pub fn gate_bounded_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Resolves once a gated fetch is waiting.
    pub async fn wait_until_gated(&self) {
        self.entered.notified().await;
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn bounded_queries(&self) -> Vec<RecordedQuery> {
        self.queries()
            .into_iter()
            .filter(|q| q.max_item_count.is_some())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_catalog_failure(&self) -> Result<(), ServiceError> {
        let call = self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_catalog_at.lock().unwrap() == Some(call) {
            return Err(ServiceError::Status {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }
}

fn page_of<T: Clone>(all: &[T], continuation: Option<String>, size: usize, charge: f64) -> FeedPage<T> {
    let start = continuation.and_then(|c| c.parse().ok()).unwrap_or(0usize).min(all.len());
    let end = (start + size).min(all.len());
    FeedPage {
        items: all[start..end].to_vec(),
        continuation: (end < all.len()).then(|| end.to_string()),
        request_charge: charge,
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentClient for FakeDocumentClient {
    async fn read_databases(
        &self,
        continuation: Option<String>,
    ) -> Result<FeedPage<DatabaseRef>, ServiceError> {
        self.check_catalog_failure()?;
        let databases = self.databases.lock().unwrap().clone();
        Ok(page_of(&databases, continuation, CATALOG_PAGE_SIZE, 1.0))
    }

    async fn read_containers(
        &self,
        database_id: &str,
        continuation: Option<String>,
    ) -> Result<FeedPage<ContainerRef>, ServiceError> {
        self.check_catalog_failure()?;
        let containers = self
            .containers
            .lock()
            .unwrap()
            .get(database_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("dbs/{database_id}")))?;
        Ok(page_of(&containers, continuation, CATALOG_PAGE_SIZE, 1.0))
    }

    async fn query_documents(
        &self,
        query: DocumentQuery<'_>,
        continuation: Option<String>,
    ) -> Result<FeedPage<Value>, ServiceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        self.queries.lock().unwrap().push(RecordedQuery {
            query: query.query.to_string(),
            max_item_count: query.max_item_count,
            continuation: continuation.clone(),
        });

        if query.max_item_count.is_some() {
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                self.entered.notify_one();
                gate.acquire().await.expect("gate closed").forget();
            }
        }

        if let Some(message) = self.query_failure.lock().unwrap().clone() {
            return Err(ServiceError::Status { status: 400, message });
        }
        let key = (query.database_id.to_string(), query.container_id.to_string());
        let documents = self
            .documents
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("dbs/{}/colls/{}", key.0, key.1)))?;
        let size = query
            .max_item_count
            .map(|n| n as usize)
            .unwrap_or(SERVICE_PAGE_SIZE);
        Ok(page_of(&documents, continuation, size, PAGE_CHARGE))
    }
}

/// Connector handing out one shared fake client.
pub(crate) struct FakeConnector {
    client: Arc<FakeDocumentClient>,
    failure: Option<String>,
    connects: AtomicUsize,
    connection_strings: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(client: Arc<FakeDocumentClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            failure: None,
            connects: AtomicUsize::new(0),
            connection_strings: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            client: FakeDocumentClient::new(),
            failure: Some(message.to_string()),
            connects: AtomicUsize::new(0),
            connection_strings: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn connection_strings(&self) -> Vec<String> {
        self.connection_strings.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientConnector for FakeConnector {
    async fn connect(&self, connection_string: &str) -> AppResult<Arc<dyn DocumentClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connection_strings
            .lock()
            .unwrap()
            .push(connection_string.to_string());
        match &self.failure {
            Some(message) => Err(AppError::Connection(message.clone())),
            None => Ok(Arc::clone(&self.client) as Arc<dyn DocumentClient>),
        }
    }
}
