//! Catalog entities: databases and containers of an account.
//!
//! Both are fetched fresh from the service and never cached across
//! connections. The service returns many more system properties
//! (`_rid`, `_etag`, ...); only the identifier is kept.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A database on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRef {
    /// Database identifier.
    pub id: String,
}

/// A container within a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRef {
    /// Container identifier.
    pub id: String,
}

impl DatabaseRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl ContainerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}
