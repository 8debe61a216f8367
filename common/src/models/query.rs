//! Query result models.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of a document query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    /// Documents in service order, untyped.
    pub items: Vec<Value>,

    /// Token resuming after this page; `None` when the result set is exhausted.
    pub continuation_token: Option<String>,

    /// Request units charged for fetching this page.
    pub request_charge: f64,
}

impl QueryPage {
    /// The page returned when the query matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
