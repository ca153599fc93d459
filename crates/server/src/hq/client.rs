// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for one peer server.

use std::sync::Once;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method};

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// Deadline for list/read calls.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for mutating calls.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// A mirrored upstream response.
#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// HTTP client wrapper for a single peer.
pub struct RemoteClient {
    base_url: String,
    token: String,
    client: Client,
}

impl RemoteClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        INSTALL_CRYPTO_PROVIDER.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
        let client = Client::builder().build().unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), token: token.to_owned(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check peer liveness.
    pub async fn health(&self) -> anyhow::Result<()> {
        self.client
            .get(self.url("/api/health"))
            .timeout(READ_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fetch the peer's session list (5 s deadline).
    pub async fn list_sessions(&self) -> anyhow::Result<Vec<serde_json::Value>> {
        let resp = self
            .client
            .get(self.url("/api/sessions"))
            .bearer_auth(&self.token)
            .timeout(READ_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Forward a request and mirror the peer's status and body verbatim.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> anyhow::Result<ProxiedResponse> {
        let timeout = if method == Method::GET { READ_TIMEOUT } else { WRITE_TIMEOUT };
        let mut req =
            self.client.request(method, self.url(path)).bearer_auth(&self.token).timeout(timeout);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp.bytes().await?;
        Ok(ProxiedResponse { status, content_type, body })
    }

    /// Open a streaming GET (SSE proxying); no overall deadline.
    pub async fn stream(&self, path: &str) -> anyhow::Result<reqwest::Response> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp)
    }

    /// The peer's WebSocket URL with the bearer token as a query parameter.
    pub fn ws_url(&self) -> String {
        let ws_base = if self.base_url.starts_with("https://") {
            self.base_url.replacen("https://", "wss://", 1)
        } else {
            self.base_url.replacen("http://", "ws://", 1)
        };
        format!("{ws_base}/ws?token={}", self.token)
    }
}
