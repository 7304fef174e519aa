//! Client configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the vault service client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the vault server (e.g., "https://vault.keyfold.io").
    /// Identity and API endpoints are derived from it.
    pub base_url: String,

    /// Stable identifier for this device, sent with token requests so the
    /// server can recognize it on subsequent logins.
    pub device_identifier: String,

    /// Human-readable device name shown in the account's device list.
    pub device_name: String,

    /// OAuth client id of this application.
    pub client_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://vault.keyfold.io".to_string(),
            device_identifier: uuid::Uuid::new_v4().to_string(),
            device_name: "keyfold-agent".to_string(),
            client_id: "desktop".to_string(),
        }
    }
}

impl ClientConfig {
    /// Creates a config pointed at a specific server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(base_url.into()),
            ..Self::default()
        }
    }

    /// Identity (token) endpoint root.
    pub fn identity_url(&self) -> String {
        format!("{}/identity", self.base_url.trim_end_matches('/'))
    }

    /// Resource API endpoint root.
    pub fn api_url(&self) -> String {
        format!("{}/api", self.base_url.trim_end_matches('/'))
    }
}

fn trim_base(mut s: String) -> String {
    while s.ends_with('/') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_endpoints() {
        let cfg = ClientConfig::with_base_url("https://vault.example.com/");
        assert_eq!(cfg.identity_url(), "https://vault.example.com/identity");
        assert_eq!(cfg.api_url(), "https://vault.example.com/api");
    }
}
