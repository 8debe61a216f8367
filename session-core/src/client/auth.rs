//! Connection-string parsing and master-key request signing.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::Sha256;

use common::errors::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Endpoint and decoded key extracted from a connection string.
pub(crate) struct AccountCredentials {
    pub endpoint: String,
    pub key: MasterKey,
}

impl AccountCredentials {
    /// Parses `AccountEndpoint=...;AccountKey=...;` in any segment order.
    pub fn parse(connection_string: &str) -> AppResult<Self> {
        let mut endpoint = None;
        let mut key = None;
        for segment in connection_string.split(';').map(str::trim) {
            if segment.is_empty() {
                continue;
            }
            let Some((name, value)) = segment.split_once('=') else {
                return Err(AppError::Connection(format!(
                    "malformed connection string segment '{}'",
                    segment.split('=').next().unwrap_or_default()
                )));
            };
            if name.eq_ignore_ascii_case("AccountEndpoint") {
                endpoint = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("AccountKey") {
                key = Some(value.to_string());
            }
        }

        let endpoint = endpoint
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Connection("connection string has no AccountEndpoint".into()))?;
        let key = key
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Connection("connection string has no AccountKey".into()))?;

        Ok(Self {
            endpoint,
            key: MasterKey::decode(&key)?,
        })
    }
}

/// Account master key, ready for signing.
#[derive(Clone)]
pub(crate) struct MasterKey {
    mac: HmacSha256,
}

impl MasterKey {
    pub fn decode(encoded: &str) -> AppResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Connection(format!("AccountKey is not valid base64: {e}")))?;
        let mac = HmacSha256::new_from_slice(&bytes)
            .map_err(|e| AppError::Connection(format!("AccountKey rejected: {e}")))?;
        Ok(Self { mac })
    }

    /// Builds the URL-encoded `Authorization` header value for one request.
    ///
    /// `resource_link` is the unencoded resource path without a leading
    /// slash (empty for account-level feeds). `date` must be the exact
    /// `x-ms-date` header value.
    pub fn authorization(&self, verb: &str, resource_type: &str, resource_link: &str, date: &str) -> String {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_lowercase(),
            resource_type.to_lowercase(),
            resource_link,
            date.to_lowercase()
        );
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        let token = format!("type=master&ver=1.0&sig={signature}");
        utf8_percent_encode(&token, NON_ALPHANUMERIC).to_string()
    }
}

/// Formats a timestamp the way the `x-ms-date` header expects (RFC 1123).
pub(crate) fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
