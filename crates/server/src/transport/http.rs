// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers: thin adapters over the session store, PTY commanders,
//! emulator feeds, and (in HQ mode) the remote proxy.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::hq::client::RemoteClient;
use crate::hq::proxy::forward_session_request;
use crate::hq::registry::RemoteInfo;
use crate::hq::Remote;
use crate::pty::PtyCommand;
use crate::session::{self, CreateParams, SessionInfo, SessionStatus, TitleMode, MAX_NAME_LEN};
use crate::state::AppState;

/// Largest accepted terminal dimension.
const MAX_TERM_DIM: u16 = 1000;
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
    #[serde(default)]
    pub title_mode: Option<TitleMode>,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default, rename = "spawn_terminal")]
    pub spawn_terminal: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TextQuery {
    #[serde(default)]
    pub styles: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRemoteRequest {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub token: String,
}

// -- Helpers ------------------------------------------------------------------

/// Find the remote owning `session_id`, when running as HQ.
async fn remote_for_session(state: &Arc<AppState>, session_id: &str) -> Option<Arc<Remote>> {
    if !state.config.hq {
        return None;
    }
    state.remotes.find_by_session(session_id).await
}

fn not_found() -> Response {
    ApiError::NotFound.to_http_response("session not found").into_response()
}

fn not_running() -> Response {
    ApiError::Busy.to_http_response("session is not running").into_response()
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// `GET /api/server/status`
pub async fn server_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "macAppConnected": false,
        "isHQMode": state.config.hq,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /api/sessions` — local sessions plus, in HQ mode, all remote
/// sessions fetched in parallel (failing peers are logged and skipped).
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut entries: Vec<serde_json::Value> = state
        .store
        .list()
        .into_iter()
        .filter_map(|info| {
            let mut value = serde_json::to_value(&info).ok()?;
            value["source"] = "local".into();
            Some(value)
        })
        .collect();

    if state.config.hq {
        let remotes = state.remotes.list().await;
        let fetches = remotes.iter().map(|remote| {
            let remote = Arc::clone(remote);
            async move {
                let client = RemoteClient::new(&remote.url, &remote.token);
                (remote, client.list_sessions().await)
            }
        });
        for (remote, result) in futures_util::future::join_all(fetches).await {
            match result {
                Ok(sessions) => {
                    let ids: Vec<String> = sessions
                        .iter()
                        .filter_map(|s| s.get("id").and_then(|v| v.as_str()))
                        .map(str::to_owned)
                        .collect();
                    state.remotes.record_sessions(&remote, ids).await;
                    for mut value in sessions {
                        value["source"] = "remote".into();
                        value["remoteId"] = remote.id.clone().into();
                        value["remoteName"] = remote.name.clone().into();
                        entries.push(value);
                    }
                }
                Err(e) => {
                    tracing::warn!(remote = %remote.name, err = %e, "remote session list failed");
                }
            }
        }
    }

    Json(entries)
}

/// `POST /api/sessions`
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    // A remoteId routes the create to a peer; the field is stripped from
    // the forwarded body so the peer cannot recurse.
    if let Some(ref remote_id) = req.remote_id {
        if !state.config.hq {
            return ApiError::Validation
                .to_http_response("remoteId requires HQ mode")
                .into_response();
        }
        let remote = {
            let all = state.remotes.list().await;
            all.into_iter().find(|r| &r.id == remote_id || &r.name == remote_id)
        };
        let Some(remote) = remote else {
            return ApiError::NotFound.to_http_response("unknown remote").into_response();
        };
        let mut body = serde_json::json!({
            "command": req.command,
            "workingDir": req.working_dir,
            "name": req.name,
            "cols": req.cols,
            "rows": req.rows,
            "titleMode": req.title_mode,
        });
        if let Some(obj) = body.as_object_mut() {
            obj.retain(|_, v| !v.is_null());
        }
        let client = RemoteClient::new(&remote.url, &remote.token);
        return match client.forward(Method::POST, "/api/sessions", Some(&body)).await {
            Ok(proxied) => crate::hq::proxy::mirror(
                proxied.status,
                proxied.content_type.as_deref(),
                proxied.body,
            ),
            Err(e) => {
                tracing::warn!(remote = %remote.name, err = %e, "remote create failed");
                ApiError::Upstream.to_http_response("upstream unreachable").into_response()
            }
        };
    }

    if req.command.is_empty() {
        return ApiError::Validation.to_http_response("command must not be empty").into_response();
    }
    let cols = req.cols.unwrap_or(DEFAULT_COLS);
    let rows = req.rows.unwrap_or(DEFAULT_ROWS);
    if !dim_ok(cols) || !dim_ok(rows) {
        return ApiError::Validation
            .to_http_response("cols and rows must be within 1..=1000")
            .into_response();
    }

    let params = CreateParams {
        command: req.command,
        working_dir: req.working_dir,
        name: req.name,
        cols,
        rows,
        title_mode: req.title_mode.unwrap_or_default(),
    };
    match session::create_session(&state, params).await {
        Ok(info) => Json(CreateSessionResponse {
            session_id: info.id,
            created_at: info.started_at,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(err = %e, "session create failed");
            ApiError::Pty.to_http_response_with("failed to spawn session", format!("{e:#}"))
                .into_response()
        }
    }
}

/// `GET /api/sessions/{id}`
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Some(info) = state.store.load(&id) {
        return Json(SessionEntry {
            info,
            source: "local".to_owned(),
            remote_id: None,
            remote_name: None,
        })
        .into_response();
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        return forward_session_request(
            &state,
            &remote,
            &id,
            Method::GET,
            &format!("/api/sessions/{id}"),
            None,
        )
        .await;
    }
    not_found()
}

/// `DELETE /api/sessions/{id}` — kill a running session, or clean up an
/// exited one.
pub async fn kill_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Some(handle) = state.store.get_live(&id).await {
        handle.pty.kill(nix::sys::signal::Signal::SIGTERM).await;
        return Json(serde_json::json!({"success": true, "message": "Session killed"}))
            .into_response();
    }
    if let Some(info) = state.store.load(&id) {
        if info.status == SessionStatus::Exited {
            if let Err(e) = state.store.remove_dir(&id) {
                return ApiError::Internal
                    .to_http_response_with("cleanup failed", format!("{e:#}"))
                    .into_response();
            }
            return Json(serde_json::json!({"success": true, "message": "Session cleaned up"}))
                .into_response();
        }
        // On disk as starting/running but no live handle: an external tool
        // owns it, or we crashed. Treat as not killable here.
        return not_running();
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        let response = forward_session_request(
            &state,
            &remote,
            &id,
            Method::DELETE,
            &format!("/api/sessions/{id}"),
            None,
        )
        .await;
        if response.status().is_success() {
            state.remotes.unindex_session(&id).await;
        }
        return response;
    }
    not_found()
}

/// `DELETE /api/sessions/{id}/cleanup`
pub async fn cleanup_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Some(handle) = state.store.get_live(&id).await {
        handle.pty.kill(nix::sys::signal::Signal::SIGKILL).await;
        handle.cancel.cancel();
        state.store.unregister(&id).await;
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        let response = forward_session_request(
            &state,
            &remote,
            &id,
            Method::DELETE,
            &format!("/api/sessions/{id}/cleanup"),
            None,
        )
        .await;
        if response.status().is_success() {
            state.remotes.unindex_session(&id).await;
        }
        return response;
    }
    if state.store.load(&id).is_none() {
        return not_found();
    }
    match state.store.remove_dir(&id) {
        Ok(()) => Json(serde_json::json!({"success": true})).into_response(),
        Err(e) => ApiError::Internal
            .to_http_response_with("cleanup failed", format!("{e:#}"))
            .into_response(),
    }
}

/// `POST /api/cleanup-exited` — idempotent.
pub async fn cleanup_exited(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cleaned = state.store.cleanup_exited();
    Json(serde_json::json!({"cleanedSessions": cleaned}))
}

/// `PATCH /api/sessions/{id}` — rename, auto-disambiguated.
pub async fn rename_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Response {
    if req.name.is_empty() || req.name.len() > MAX_NAME_LEN {
        return ApiError::Validation
            .to_http_response("name must be 1..=255 bytes")
            .into_response();
    }
    if state.store.load(&id).is_some() {
        return match state.store.update_name(&id, &req.name).await {
            Ok(name) => {
                Json(serde_json::json!({"success": true, "name": name})).into_response()
            }
            Err(e) => ApiError::Internal
                .to_http_response_with("rename failed", format!("{e:#}"))
                .into_response(),
        };
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        return forward_session_request(
            &state,
            &remote,
            &id,
            Method::PATCH,
            &format!("/api/sessions/{id}"),
            Some(serde_json::json!({"name": req.name})),
        )
        .await;
    }
    not_found()
}

/// `GET /api/sessions/{id}/buffer` — binary snapshot of the live viewport.
pub async fn session_buffer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Some(handle) = state.store.get_live(&id).await {
        let snapshot = handle.term.snapshot().await;
        let body = vtproto::snapshot::encode(&snapshot);
        return ([(header::CONTENT_TYPE, "application/octet-stream")], Bytes::from(body))
            .into_response();
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        return forward_session_request(
            &state,
            &remote,
            &id,
            Method::GET,
            &format!("/api/sessions/{id}/buffer"),
            None,
        )
        .await;
    }
    if state.store.load(&id).is_some() {
        return not_running();
    }
    not_found()
}

/// `GET /api/sessions/{id}/text` — plain (or `?styles` bracketed) viewport.
pub async fn session_text(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TextQuery>,
) -> Response {
    if let Some(handle) = state.store.get_live(&id).await {
        let emulator = handle.term.emulator.read().await;
        let text =
            if query.styles.is_some() { emulator.styled_text() } else { emulator.text() };
        return ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response();
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        let suffix = if query.styles.is_some() { "?styles" } else { "" };
        return forward_session_request(
            &state,
            &remote,
            &id,
            Method::GET,
            &format!("/api/sessions/{id}/text{suffix}"),
            None,
        )
        .await;
    }
    if state.store.load(&id).is_some() {
        return not_running();
    }
    not_found()
}

/// `POST /api/sessions/{id}/input` — `{text}` or `{key}`, exactly one.
pub async fn session_input(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<InputRequest>,
) -> Response {
    let payload = match (&req.text, &req.key) {
        (Some(text), None) => text.clone().into_bytes(),
        (None, Some(key)) => match vtproto::keys::key_sequence(key) {
            Some(bytes) => bytes,
            None => {
                return ApiError::Validation
                    .to_http_response(format!("unknown key: {key}"))
                    .into_response()
            }
        },
        _ => {
            return ApiError::Validation
                .to_http_response("exactly one of text or key is required")
                .into_response()
        }
    };

    if let Some(handle) = state.store.get_live(&id).await {
        handle.pty.write(Bytes::from(payload)).await;
        return Json(serde_json::json!({"success": true})).into_response();
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        let body = match (&req.text, &req.key) {
            (Some(text), _) => serde_json::json!({"text": text}),
            (_, Some(key)) => serde_json::json!({"key": key}),
            _ => serde_json::Value::Null,
        };
        return forward_session_request(
            &state,
            &remote,
            &id,
            Method::POST,
            &format!("/api/sessions/{id}/input"),
            Some(body),
        )
        .await;
    }
    if state.store.load(&id).is_some() {
        return not_running();
    }
    not_found()
}

fn dim_ok(v: u16) -> bool {
    (1..=MAX_TERM_DIM).contains(&v)
}

/// `POST /api/sessions/{id}/resize`
pub async fn session_resize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ResizeRequest>,
) -> Response {
    if !dim_ok(req.cols) || !dim_ok(req.rows) {
        return ApiError::Validation
            .to_http_response("cols and rows must be within 1..=1000")
            .into_response();
    }
    if let Some(handle) = state.store.get_live(&id).await {
        handle.pty.resize(req.cols, req.rows).await;
        return Json(serde_json::json!({"success": true, "cols": req.cols, "rows": req.rows}))
            .into_response();
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        return forward_session_request(
            &state,
            &remote,
            &id,
            Method::POST,
            &format!("/api/sessions/{id}/resize"),
            Some(serde_json::json!({"cols": req.cols, "rows": req.rows})),
        )
        .await;
    }
    if state.store.load(&id).is_some() {
        return not_running();
    }
    not_found()
}

/// `POST /api/sessions/{id}/reset-size`
pub async fn session_reset_size(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Some(handle) = state.store.get_live(&id).await {
        handle.pty.send(PtyCommand::ResetSize).await;
        return Json(serde_json::json!({"success": true})).into_response();
    }
    if let Some(remote) = remote_for_session(&state, &id).await {
        return forward_session_request(
            &state,
            &remote,
            &id,
            Method::POST,
            &format!("/api/sessions/{id}/reset-size"),
            None,
        )
        .await;
    }
    if state.store.load(&id).is_some() {
        return not_running();
    }
    not_found()
}

// -- HQ peer management -------------------------------------------------------

/// `GET /api/remotes`
pub async fn list_remotes(State(state): State<Arc<AppState>>) -> Response {
    if !state.config.hq {
        return ApiError::Validation.to_http_response("not in HQ mode").into_response();
    }
    let remotes = state.remotes.list().await;
    let infos: Vec<RemoteInfo> = remotes
        .iter()
        .map(|r| RemoteInfo { id: r.id.clone(), name: r.name.clone(), url: r.url.clone() })
        .collect();
    Json(infos).into_response()
}

/// `POST /api/remotes/register` — a peer announces itself. The peer is
/// health-checked before the registration is accepted.
pub async fn register_remote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRemoteRequest>,
) -> Response {
    if !state.config.hq {
        return ApiError::Validation.to_http_response("not in HQ mode").into_response();
    }
    if req.name.is_empty() || req.url.is_empty() {
        return ApiError::Validation.to_http_response("name and url are required").into_response();
    }

    let client = RemoteClient::new(&req.url, &req.token);
    if let Err(e) = client.health().await {
        tracing::warn!(url = %req.url, err = %e, "peer health check failed during registration");
        return ApiError::Upstream
            .to_http_response_with("peer unreachable", format!("{e:#}"))
            .into_response();
    }

    let remote = state.remotes.register(req.id, req.name, req.url, req.token).await;
    tracing::info!(remote = %remote.name, url = %remote.url, "remote registered");
    Json(serde_json::json!({"id": remote.id, "name": remote.name, "registered": true}))
        .into_response()
}

/// `DELETE /api/remotes/{name}`
pub async fn unregister_remote(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if !state.config.hq {
        return ApiError::Validation.to_http_response("not in HQ mode").into_response();
    }
    match state.remotes.unregister(&name).await {
        Some(remote) => {
            tracing::info!(remote = %remote.name, "remote unregistered");
            Json(serde_json::json!({"success": true})).into_response()
        }
        None => ApiError::NotFound.to_http_response("unknown remote").into_response(),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
