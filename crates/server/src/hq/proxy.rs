// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP proxying helpers for sessions living on a peer.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::Method;

use super::client::RemoteClient;
use super::registry::Remote;
use crate::error::ApiError;
use crate::state::AppState;

/// Forward a request for a remote session and mirror the peer's response.
///
/// A 404 from the peer also unindexes the session (it no longer lives
/// there); any transport failure surfaces as `503 upstream`.
pub async fn forward_session_request(
    state: &Arc<AppState>,
    remote: &Arc<Remote>,
    session_id: &str,
    method: Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> Response {
    let client = RemoteClient::new(&remote.url, &remote.token);
    match client.forward(method, path, body.as_ref()).await {
        Ok(proxied) => {
            if proxied.status == 404 {
                state.remotes.unindex_session(session_id).await;
            }
            mirror(proxied.status, proxied.content_type.as_deref(), proxied.body)
        }
        Err(e) => {
            tracing::warn!(remote = %remote.name, err = %e, "upstream request failed");
            ApiError::Upstream.to_http_response("upstream unreachable").into_response()
        }
    }
}

/// Build an axum response mirroring an upstream status/content-type/body.
pub fn mirror(status: u16, content_type: Option<&str>, body: bytes::Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder.body(Body::from(body)).unwrap_or_else(|_| {
        ApiError::Internal.to_http_response("proxy response build failed").into_response()
    })
}

/// Proxy a peer's SSE stream as-is.
pub async fn forward_sse(remote: &Arc<Remote>, path: &str) -> Response {
    let client = RemoteClient::new(&remote.url, &remote.token);
    match client.stream(path).await {
        Ok(resp) => {
            let stream = resp.bytes_stream();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| {
                    ApiError::Internal.to_http_response("proxy stream failed").into_response()
                })
        }
        Err(e) => {
            tracing::warn!(remote = %remote.name, err = %e, "upstream SSE failed");
            ApiError::Upstream.to_http_response("upstream unreachable").into_response()
        }
    }
}

/// Get or (re)create the WS bridge for a remote session.
pub async fn session_bridge(
    remote: &Arc<Remote>,
    session_id: &str,
) -> Arc<super::ws_bridge::WsBridge> {
    {
        let bridges = remote.bridges.read().await;
        if let Some(bridge) = bridges.get(session_id) {
            if !bridge.is_cancelled() {
                return Arc::clone(bridge);
            }
        }
    }

    let mut bridges = remote.bridges.write().await;
    if let Some(bridge) = bridges.get(session_id) {
        if !bridge.is_cancelled() {
            return Arc::clone(bridge);
        }
    }
    let client = RemoteClient::new(&remote.url, &remote.token);
    let bridge = super::ws_bridge::WsBridge::connect(
        client.ws_url(),
        session_id.to_owned(),
        &remote.cancel,
    );
    bridges.insert(session_id.to_owned(), Arc::clone(&bridge));
    bridge
}
