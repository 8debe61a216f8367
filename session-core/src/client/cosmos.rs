//! Cosmos DB REST client.
//!
//! Talks to the account gateway with master-key authorization. Only the
//! three read feeds the session needs are implemented.

use async_trait::async_trait;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use common::errors::{AppError, AppResult};
use common::models::{ContainerRef, DatabaseRef};

use super::auth::{http_date, AccountCredentials, MasterKey};
use super::{ClientOptions, DocumentClient, DocumentQuery, FeedPage, ServiceError, API_VERSION};

const HEADER_DATE: &str = "x-ms-date";
const HEADER_VERSION: &str = "x-ms-version";
const HEADER_CONTINUATION: &str = "x-ms-continuation";
const HEADER_MAX_ITEM_COUNT: &str = "x-ms-max-item-count";
const HEADER_REQUEST_CHARGE: &str = "x-ms-request-charge";
const HEADER_IS_QUERY: &str = "x-ms-documentdb-isquery";
const HEADER_CROSS_PARTITION: &str = "x-ms-documentdb-query-enablecrosspartition";
const QUERY_CONTENT_TYPE: &str = "application/query+json";

/// Characters escaped inside a resource id path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Query body; the service expects camelCase members.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuerySpec<'a> {
    query: &'a str,
    parameters: Vec<Value>,
}

/// One feed request, before signing.
struct FeedRequest<'a> {
    method: Method,
    resource_type: &'static str,
    /// Unescaped link used for signing, e.g. `dbs/orders/colls/2024`.
    resource_link: String,
    /// Escaped path appended to the endpoint.
    path: String,
    /// Member of the response body holding the page's items.
    items_field: &'static str,
    continuation: Option<String>,
    max_item_count: Option<u32>,
    query: Option<&'a str>,
}

/// Client for one Cosmos DB account.
pub struct CosmosClient {
    http: reqwest::Client,
    endpoint: Url,
    key: MasterKey,
}

impl CosmosClient {
    /// Builds a client from an account connection string.
    ///
    /// Nothing is sent over the network here; an unreachable endpoint shows
    /// up on the first request.
    pub fn new(connection_string: &str, options: &ClientOptions) -> AppResult<Self> {
        let credentials = AccountCredentials::parse(connection_string)?;
        let mut endpoint = Url::parse(&credentials.endpoint)
            .map_err(|e| AppError::Connection(format!("invalid AccountEndpoint: {e}")))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!("cosmos-session/", env!("CARGO_PKG_VERSION")));
        if options.emulator {
            // The local emulator serves a self-signed certificate over HTTP/1.1.
            builder = builder.danger_accept_invalid_certs(true).http1_only();
        }
        let http = builder
            .build()
            .map_err(|e| AppError::Connection(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(endpoint = %endpoint, emulator = options.emulator, "cosmos client built");
        Ok(Self {
            http,
            endpoint,
            key: credentials.key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn read_feed<T: DeserializeOwned>(
        &self,
        request: FeedRequest<'_>,
    ) -> Result<FeedPage<T>, ServiceError> {
        let url = self
            .endpoint
            .join(&request.path)
            .map_err(|e| ServiceError::Decode(format!("bad resource path '{}': {e}", request.path)))?;
        let date = http_date(Utc::now());
        let authorization =
            self.key
                .authorization(request.method.as_str(), request.resource_type, &request.resource_link, &date);

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_DATE, header_value(&date)?);
        headers.insert(HEADER_VERSION, HeaderValue::from_static(API_VERSION));
        headers.insert(reqwest::header::AUTHORIZATION, header_value(&authorization)?);
        if let Some(token) = &request.continuation {
            headers.insert(HEADER_CONTINUATION, header_value(token)?);
        }
        if let Some(count) = request.max_item_count {
            headers.insert(HEADER_MAX_ITEM_COUNT, HeaderValue::from(count));
        }

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(query) = request.query {
            headers.insert(HEADER_IS_QUERY, HeaderValue::from_static("True"));
            headers.insert(HEADER_CROSS_PARTITION, HeaderValue::from_static("True"));
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(QUERY_CONTENT_TYPE));
            let body = serde_json::to_vec(&QuerySpec {
                query,
                parameters: Vec::new(),
            })
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
            builder = builder.body(body);
        }

        let response = builder.headers(headers).send().await?;
        let response = check_status(response, &request.resource_link).await?;

        let continuation = response
            .headers()
            .get(HEADER_CONTINUATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let request_charge = response
            .headers()
            .get(HEADER_REQUEST_CHARGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);

        let mut body: Value = response.json().await?;
        let items = body
            .get_mut(request.items_field)
            .map(Value::take)
            .ok_or_else(|| ServiceError::Decode(format!("response has no '{}' member", request.items_field)))?;
        let items: Vec<T> = serde_json::from_value(items).map_err(|e| ServiceError::Decode(e.to_string()))?;

        tracing::trace!(
            resource = %request.resource_link,
            count = items.len(),
            request_charge,
            has_more = continuation.is_some(),
            "feed page read"
        );
        Ok(FeedPage {
            items,
            continuation,
            request_charge,
        })
    }
}

#[async_trait]
impl DocumentClient for CosmosClient {
    async fn read_databases(
        &self,
        continuation: Option<String>,
    ) -> Result<FeedPage<DatabaseRef>, ServiceError> {
        self.read_feed(FeedRequest {
            method: Method::GET,
            resource_type: "dbs",
            resource_link: String::new(),
            path: "dbs".to_string(),
            items_field: "Databases",
            continuation,
            max_item_count: None,
            query: None,
        })
        .await
    }

    async fn read_containers(
        &self,
        database_id: &str,
        continuation: Option<String>,
    ) -> Result<FeedPage<ContainerRef>, ServiceError> {
        self.read_feed(FeedRequest {
            method: Method::GET,
            resource_type: "colls",
            resource_link: format!("dbs/{database_id}"),
            path: format!("dbs/{}/colls", escape(database_id)),
            items_field: "DocumentCollections",
            continuation,
            max_item_count: None,
            query: None,
        })
        .await
    }

    async fn query_documents(
        &self,
        query: DocumentQuery<'_>,
        continuation: Option<String>,
    ) -> Result<FeedPage<Value>, ServiceError> {
        self.read_feed(FeedRequest {
            method: Method::POST,
            resource_type: "docs",
            resource_link: format!("dbs/{}/colls/{}", query.database_id, query.container_id),
            path: format!(
                "dbs/{}/colls/{}/docs",
                escape(query.database_id),
                escape(query.container_id)
            ),
            items_field: "Documents",
            continuation,
            max_item_count: query.max_item_count,
            query: Some(query.query),
        })
        .await
    }
}

fn escape(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

fn header_value(value: &str) -> Result<HeaderValue, ServiceError> {
    HeaderValue::from_str(value).map_err(|e| ServiceError::Decode(format!("invalid header value: {e}")))
}

/// Turns non-success statuses into errors carrying the service's message.
async fn check_status(response: Response, resource: &str) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);

    if status == StatusCode::NOT_FOUND {
        let resource = if resource.is_empty() { "account" } else { resource };
        return Err(ServiceError::NotFound(resource.to_string()));
    }
    Err(ServiceError::Status {
        status: status.as_u16(),
        message,
    })
}
