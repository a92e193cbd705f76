//! Auxiliary HTTP client bound to a session.
//!
//! Some backend endpoints are only reachable over HTTPS on the same server the
//! connection points at. The client is built per session so that dev mode
//! (certificate validation off) never outlives the session that asked for it.

use crate::config::{BridgeConfig, ConnectOptions};
use crate::{GatewayError, Result};
use reqwest::{header, Client};
use tracing::debug;

/// HTTP client for REST calls against the connected server.
#[derive(Debug, Clone)]
pub struct AuxHttpClient {
    client: Client,
    base_url: String,
    insecure: bool,
}

impl AuxHttpClient {
    /// Build a client for the server named in `options`.
    pub fn new(options: &ConnectOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(BridgeConfig::HTTP_REQUEST_TIMEOUT)
            .user_agent(BridgeConfig::USER_AGENT)
            .danger_accept_invalid_certs(options.dev_mode)
            .build()
            .map_err(|e| GatewayError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: options.rest_base_url(),
            insecure: options.dev_mode,
        })
    }

    /// Whether certificate validation is disabled.
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    /// Absolute URL for a route relative to the server.
    pub fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route.trim_start_matches('/'))
    }

    /// POST an opaque JSON payload and return the response body.
    pub async fn post_json(&self, route: &str, body: &str) -> Result<String> {
        let url = self.url(route);
        let body = if body.trim().is_empty() { "{}" } else { body };
        debug!("POST {} ({} bytes)", url, body.len());

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Transport {
                message: format!("POST {} returned {}: {}", url, status, text),
            });
        }
        Ok(text)
    }
}
