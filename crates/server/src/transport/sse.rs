// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent-events stream of a session's asciinema lines.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::error::ApiError;
use crate::hq::proxy::forward_sse;
use crate::state::AppState;
use crate::stream::StartAt;

/// `GET /api/sessions/{id}/stream`
///
/// Replays from the last clear, then stays hot. The response opens with an
/// `:ok` comment and heartbeats every 30 s so intermediary proxies keep the
/// connection open. Dropping the response detaches the subscription.
pub async fn stream_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Some(handle) = state.store.get_live(&id).await {
        let sub = handle.watcher.attach(StartAt::LastClear).await;
        let lines = UnboundedReceiverStream::new(sub.rx)
            .map(|item| Ok::<Event, Infallible>(Event::default().data(item.line.as_ref())));
        let stream = tokio_stream::once(Ok(Event::default().comment("ok"))).chain(lines);
        return Sse::new(stream)
            .keep_alive(
                KeepAlive::new().interval(Duration::from_secs(30)).text("heartbeat"),
            )
            .into_response();
    }

    if state.config.hq {
        if let Some(remote) = state.remotes.find_by_session(&id).await {
            return forward_sse(&remote, &format!("/api/sessions/{id}/stream")).await;
        }
    }

    // Exited sessions still stream their recorded history.
    if state.store.load(&id).is_some() {
        let watcher = crate::stream::StreamWatcher::new(
            state.store.session_dir(&id).join("stdout"),
        );
        let sub = watcher.attach(StartAt::LastClear).await;
        let lines = UnboundedReceiverStream::new(sub.rx)
            .map(|item| Ok::<Event, Infallible>(Event::default().data(item.line.as_ref())));
        let stream = tokio_stream::once(Ok(Event::default().comment("ok"))).chain(lines);
        return Sse::new(stream)
            .keep_alive(
                KeepAlive::new().interval(Duration::from_secs(30)).text("heartbeat"),
            )
            .into_response();
    }

    ApiError::NotFound.to_http_response("session not found").into_response()
}
