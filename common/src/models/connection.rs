//! Connection string model.
//!
//! A saved connection is nothing more than an account connection string of
//! the form `AccountEndpoint=https://<host>.documents.<suffix>:443/;AccountKey=<key>;`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

static CONNECTION_STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^AccountEndpoint=https://[a-zA-Z0-9\-]+\.documents\.[a-zA-Z0-9\-]+(\.[a-zA-Z0-9\-]+)*:443/;AccountKey=[a-zA-Z0-9+=/]+;?$",
    )
    .expect("connection string pattern is valid")
});

/// A validated account connection string.
///
/// Held in normalized form: trailing `;` removed. Two inputs that differ
/// only by the trailing separator are the same profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ConnectionProfile(String);

impl ConnectionProfile {
    /// Validates `input` and returns its normalized profile.
    pub fn parse(input: &str) -> AppResult<Self> {
        if input.is_empty() {
            return Err(AppError::Validation("connection string is empty".into()));
        }
        if !Self::is_valid(input) {
            return Err(AppError::Validation(
                "expected AccountEndpoint=https://<account>.documents.<cloud>:443/;AccountKey=<key>;"
                    .into(),
            ));
        }
        Ok(Self(Self::normalize(input).to_string()))
    }

    /// Checks the connection string format.
    pub fn is_valid(input: &str) -> bool {
        CONNECTION_STRING_RE.is_match(input)
    }

    /// Form used for duplicate detection and storage.
    pub fn normalize(input: &str) -> &str {
        input.trim_end_matches(';')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionProfile {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
