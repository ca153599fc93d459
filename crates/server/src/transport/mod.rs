// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + SSE + WebSocket transport.

pub mod auth;
pub mod http;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with the full API surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Liveness (no auth)
        .route("/api/health", get(http::health))
        .route("/api/server/status", get(http::server_status))
        // Sessions
        .route("/api/sessions", get(http::list_sessions).post(http::create_session))
        .route(
            "/api/sessions/{id}",
            get(http::get_session).delete(http::kill_session).patch(http::rename_session),
        )
        .route("/api/sessions/{id}/cleanup", delete(http::cleanup_session))
        .route("/api/cleanup-exited", post(http::cleanup_exited))
        // Live surfaces
        .route("/api/sessions/{id}/stream", get(sse::stream_session))
        .route("/api/sessions/{id}/buffer", get(http::session_buffer))
        .route("/api/sessions/{id}/text", get(http::session_text))
        // Control
        .route("/api/sessions/{id}/input", post(http::session_input))
        .route("/api/sessions/{id}/resize", post(http::session_resize))
        .route("/api/sessions/{id}/reset-size", post(http::session_reset_size))
        // HQ peer management
        .route("/api/remotes", get(http::list_remotes))
        .route("/api/remotes/register", post(http::register_remote))
        .route("/api/remotes/{name}", delete(http::unregister_remote))
        // Unified multiplex WebSocket
        .route("/ws", get(ws::ws_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
