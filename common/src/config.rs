//! Configuration loading.
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file in the working directory.

use std::path::PathBuf;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8083;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const STORE_DIR: &str = "cosmos-session";
const STORE_FILE: &str = "connections.json";

/// Where saved connection strings are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Process-local list, lost on exit.
    Memory,
    /// JSON file on disk.
    File(PathBuf),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name used in logs and response metadata.
    pub service_name: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Local emulator mode: relaxed TLS and gateway-only transport.
    ///
    /// Fixed for the lifetime of the process.
    pub emulator: bool,
    /// Connection store location.
    pub connection_store: StoreLocation,
    /// Per-request transport timeout towards the document service.
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Loads configuration for the named service from the environment.
    pub fn load_with_service(service_name: &str) -> Self {
        // A missing .env file is the normal case.
        let _ = dotenvy::dotenv();
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = lookup("SERVER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let emulator = lookup("COSMOS_EMULATOR")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(cfg!(debug_assertions));
        let request_timeout_secs = lookup("REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        let connection_store = match lookup("CONNECTION_STORE") {
            Some(v) if v.eq_ignore_ascii_case("memory") => StoreLocation::Memory,
            Some(v) if !v.trim().is_empty() => StoreLocation::File(PathBuf::from(v)),
            _ => default_store_location(),
        };

        Self {
            service_name: service_name.to_string(),
            host,
            port,
            emulator,
            connection_store,
            request_timeout_secs,
        }
    }

    /// Socket address string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_store_location() -> StoreLocation {
    match dirs::config_dir() {
        Some(dir) => StoreLocation::File(dir.join(STORE_DIR).join(STORE_FILE)),
        None => {
            tracing::warn!("no platform config directory, saved connections will not persist");
            StoreLocation::Memory
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
