//! Environment-driven configuration

use std::env;

/// Shared service configuration, loaded once at startup.
///
/// Both binaries (API and worker) read the same variables so a deployment
/// configures them with a single env file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// Address the API binds to, e.g. `0.0.0.0:8080`.
    pub bind_address: String,
    /// Base URL of the storage-node gateway, e.g. `http://storage-gw:9000`.
    pub storage_node_url: String,
    /// Bearer token for storage-node requests.
    pub storage_node_token: String,
    /// Shared secret the storage-node gateway uses to verify presigned URLs.
    pub presign_secret: String,
    /// Optional webhook the worker POSTs delivered notifications to.
    pub notification_webhook_url: Option<String>,
    /// Comma-separated CORS origins for the API.
    pub allowed_origins: String,
}

impl Config {
    /// Load configuration from the environment, failing fast on anything
    /// required.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            storage_node_url: require("STORAGE_NODE_URL")?,
            storage_node_token: require("STORAGE_NODE_TOKEN")?,
            presign_secret: require("PRESIGN_SECRET")?,
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok(),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
        })
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{} must be set", name))
}
