// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The unified multiplex WebSocket (protocol v3).
//!
//! One upgrade endpoint serves every session: clients subscribe and
//! unsubscribe per session id and receive stdout bytes, binary terminal
//! snapshots, and JSON events, multiplexed over binary frames. Input,
//! resize, and kill flow upstream over the same connection. Sessions living
//! on a peer (HQ mode) are bridged transparently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vtproto::frame::{self, Frame, FrameType, SubscribePayload};
use vtproto::keys::key_sequence;

use crate::asciinema::{parse_line, StreamEvent};
use crate::events::{EventBus, ServerEvent};
use crate::hq::proxy::session_bridge;
use crate::hq::ws_bridge::WsBridge;
use crate::pty::{parse_signal, PtyCommand};
use crate::session::SessionHandle;
use crate::state::AppState;
use crate::stream::StartAt;

/// Deadline for one outbound frame write.
const WRITE_DEADLINE: Duration = Duration::from_secs(5);
/// Stdout coalescing window.
const STDOUT_COALESCE: Duration = Duration::from_millis(16);

/// Close codes per the error taxonomy.
const CLOSE_PROTOCOL: u16 = 1002;

#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws` — upgrade after validating the query token.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if state.auth.enabled() {
        let ok = matches!(query.token.as_deref().map(|t| state.auth.verify(t)), Some(Ok(())));
        if !ok {
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

/// A local subscription's running tasks.
struct LocalSub {
    cancel: CancellationToken,
}

/// A bridged subscription to a remote session.
struct RemoteSub {
    bridge: Arc<WsBridge>,
    client_id: u64,
    pump_cancel: CancellationToken,
}

/// Per-connection loop: a writer task drains the outbound queue while this
/// task reads, decodes, and dispatches client frames.
async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Message>(512);
    let conn_cancel = CancellationToken::new();

    tokio::spawn(writer_loop(ws_tx, out_rx, conn_cancel.clone()));

    let welcome = Frame::new(
        FrameType::Welcome,
        "",
        serde_json::json!({"ok": true, "version": 3}).to_string().into_bytes(),
    );
    let _ = out_tx.send(Message::Binary(frame::encode(&welcome).into())).await;

    let mut subs: HashMap<String, LocalSub> = HashMap::new();
    let mut remote_subs: HashMap<String, RemoteSub> = HashMap::new();

    loop {
        let msg = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = conn_cancel.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(_)) | None => break,
        };

        match msg {
            Message::Binary(data) => {
                let decoded = match frame::decode(&data) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::debug!(err = %e, "ws framing error");
                        let _ = out_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_PROTOCOL,
                                reason: "framing error".into(),
                            })))
                            .await;
                        break;
                    }
                };
                dispatch(&state, &out_tx, &mut subs, &mut remote_subs, decoded, &data).await;
            }
            Message::Close(_) => break,
            // Text frames are not part of the v3 protocol.
            Message::Text(_) => {
                let _ = out_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_PROTOCOL,
                        reason: "binary frames only".into(),
                    })))
                    .await;
                break;
            }
            _ => {}
        }
    }

    for (_, sub) in subs.drain() {
        sub.cancel.cancel();
    }
    for (_, sub) in remote_subs.drain() {
        sub.pump_cancel.cancel();
        sub.bridge.remove_client(sub.client_id).await;
    }
    conn_cancel.cancel();
}

/// Drain the outbound queue with a per-frame write deadline. A stalled or
/// failed write drops the connection but never the session.
async fn writer_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    while let Some(msg) = out_rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        match tokio::time::timeout(WRITE_DEADLINE, ws_tx.send(msg)).await {
            Ok(Ok(())) if !closing => {}
            _ => break,
        }
    }
    cancel.cancel();
}

async fn send_frame(out_tx: &mpsc::Sender<Message>, frame: &Frame) -> bool {
    out_tx.send(Message::Binary(frame::encode(frame).into())).await.is_ok()
}

async fn send_error(out_tx: &mpsc::Sender<Message>, session_id: &str, message: &str) {
    let payload = serde_json::json!({"message": message}).to_string().into_bytes();
    let _ = send_frame(out_tx, &Frame::new(FrameType::Error, session_id, payload)).await;
}

/// Handle one decoded client frame. `raw` is kept for verbatim forwarding
/// to a remote peer.
async fn dispatch(
    state: &Arc<AppState>,
    out_tx: &mpsc::Sender<Message>,
    subs: &mut HashMap<String, LocalSub>,
    remote_subs: &mut HashMap<String, RemoteSub>,
    decoded: Frame,
    raw: &[u8],
) {
    let session_id = decoded.session_id.clone();
    match decoded.frame_type {
        FrameType::Subscribe => {
            let Some(payload) = SubscribePayload::parse(&decoded.payload) else {
                send_error(out_tx, &session_id, "invalid subscribe payload").await;
                return;
            };

            // Re-subscribing replaces the previous flags.
            if let Some(old) = subs.remove(&session_id) {
                old.cancel.cancel();
            }

            if session_id.is_empty() {
                let cancel = CancellationToken::new();
                if payload.events() {
                    spawn_events_task(
                        state.events.clone(),
                        String::new(),
                        out_tx.clone(),
                        cancel.clone(),
                    );
                }
                subs.insert(session_id, LocalSub { cancel });
                return;
            }

            if let Some(handle) = state.store.get_live(&session_id).await {
                let cancel = CancellationToken::new();
                start_local_tasks(state, &handle, &payload, out_tx.clone(), cancel.clone());
                subs.insert(session_id, LocalSub { cancel });
                return;
            }

            if state.config.hq {
                if let Some(remote) = state.remotes.find_by_session(&session_id).await {
                    let bridge = session_bridge(&remote, &session_id).await;
                    if let Some(sub) = remote_subs.get(&session_id) {
                        sub.bridge.send_upstream(sub.client_id, raw.to_vec()).await;
                    } else {
                        let (client_id, rx) = bridge.add_client().await;
                        let pump_cancel = CancellationToken::new();
                        spawn_bridge_pump(rx, out_tx.clone(), pump_cancel.clone());
                        bridge.send_upstream(client_id, raw.to_vec()).await;
                        remote_subs.insert(
                            session_id.clone(),
                            RemoteSub { bridge, client_id, pump_cancel },
                        );
                    }
                    return;
                }
            }

            if state.store.load(&session_id).is_some() {
                send_error(out_tx, &session_id, "session is not running").await;
            } else {
                send_error(out_tx, &session_id, "unknown session").await;
            }
        }

        FrameType::Unsubscribe => {
            if let Some(sub) = subs.remove(&session_id) {
                sub.cancel.cancel();
            }
            if let Some(sub) = remote_subs.remove(&session_id) {
                sub.bridge.send_upstream(sub.client_id, raw.to_vec()).await;
                sub.pump_cancel.cancel();
                sub.bridge.remove_client(sub.client_id).await;
            }
        }

        FrameType::InputText => {
            with_session(state, out_tx, remote_subs, &session_id, raw, |handle| async move {
                handle.pty.write(Bytes::copy_from_slice(&decoded.payload)).await;
            })
            .await;
        }

        FrameType::InputKey => {
            let token = String::from_utf8_lossy(&decoded.payload).to_string();
            let Some(bytes) = key_sequence(&token) else {
                send_error(out_tx, &session_id, &format!("unknown key: {token}")).await;
                return;
            };
            with_session(state, out_tx, remote_subs, &session_id, raw, |handle| async move {
                handle.pty.write(Bytes::from(bytes)).await;
            })
            .await;
        }

        FrameType::Resize => {
            let Some((cols, rows)) = frame::parse_resize(&decoded.payload) else {
                send_error(out_tx, &session_id, "invalid resize payload").await;
                return;
            };
            if !(1..=1000).contains(&cols) || !(1..=1000).contains(&rows) {
                send_error(out_tx, &session_id, "cols and rows must be within 1..=1000").await;
                return;
            }
            with_session(state, out_tx, remote_subs, &session_id, raw, |handle| async move {
                handle.pty.resize(cols as u16, rows as u16).await;
            })
            .await;
        }

        FrameType::Kill => {
            let name = String::from_utf8_lossy(&decoded.payload).to_string();
            let Some(signal) = parse_signal(&name) else {
                send_error(out_tx, &session_id, &format!("unknown signal: {name}")).await;
                return;
            };
            with_session(state, out_tx, remote_subs, &session_id, raw, |handle| async move {
                handle.pty.kill(signal).await;
            })
            .await;
        }

        FrameType::ResetSize => {
            with_session(state, out_tx, remote_subs, &session_id, raw, |handle| async move {
                handle.pty.send(PtyCommand::ResetSize).await;
            })
            .await;
        }

        FrameType::Ping => {
            let _ = send_frame(
                out_tx,
                &Frame::new(FrameType::Pong, session_id, decoded.payload),
            )
            .await;
        }

        // Server-to-client types arriving from a client are ignored.
        _ => {}
    }
}

/// Run `action` against a live local session, forward to the owning remote,
/// or report an error frame.
async fn with_session<F, Fut>(
    state: &Arc<AppState>,
    out_tx: &mpsc::Sender<Message>,
    remote_subs: &mut HashMap<String, RemoteSub>,
    session_id: &str,
    raw: &[u8],
    action: F,
) where
    F: FnOnce(Arc<SessionHandle>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    if let Some(handle) = state.store.get_live(session_id).await {
        action(handle).await;
        return;
    }
    if let Some(sub) = remote_subs.get(session_id) {
        sub.bridge.send_upstream(sub.client_id, raw.to_vec()).await;
        return;
    }
    if state.config.hq {
        if let Some(remote) = state.remotes.find_by_session(session_id).await {
            let bridge = session_bridge(&remote, session_id).await;
            let (client_id, rx) = bridge.add_client().await;
            let pump_cancel = CancellationToken::new();
            spawn_bridge_pump(rx, out_tx.clone(), pump_cancel.clone());
            bridge.send_upstream(client_id, raw.to_vec()).await;
            remote_subs
                .insert(session_id.to_owned(), RemoteSub { bridge, client_id, pump_cancel });
            return;
        }
    }
    if state.store.load(session_id).is_some() {
        send_error(out_tx, session_id, "session is not running").await;
    } else {
        send_error(out_tx, session_id, "unknown session").await;
    }
}

/// Pump frames from a remote bridge into this connection's outbound queue.
fn spawn_bridge_pump(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = rx.recv() => {
                    match frame {
                        Some(raw) => {
                            if out_tx.send(Message::Binary(raw.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });
}

/// Start the per-subscription forwarder tasks for a local session.
fn start_local_tasks(
    state: &Arc<AppState>,
    handle: &Arc<SessionHandle>,
    payload: &SubscribePayload,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    let session_id = handle.id.clone();

    if payload.stdout() {
        spawn_stdout_task(
            Arc::clone(handle),
            session_id.clone(),
            out_tx.clone(),
            cancel.clone(),
        );
    }
    if payload.snapshots() {
        spawn_snapshot_task(
            Arc::clone(handle),
            session_id.clone(),
            payload.snap_min_ms,
            out_tx.clone(),
            cancel.clone(),
        );
    }
    if payload.events() {
        spawn_events_task(state.events.clone(), session_id, out_tx, cancel);
    }
}

/// Forward raw `o`-event bytes, replayed from the last clear and coalesced
/// up to ~16 ms per frame.
fn spawn_stdout_task(
    handle: Arc<SessionHandle>,
    session_id: String,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut sub = handle.watcher.attach(StartAt::LastClear).await;
        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                item = sub.rx.recv() => item,
            };
            let Some(first) = first else { break };

            let mut payload = output_bytes(&first.line);
            let deadline = tokio::time::Instant::now() + STDOUT_COALESCE;
            let mut closed = false;
            loop {
                match tokio::time::timeout_at(deadline, sub.rx.recv()).await {
                    Ok(Some(item)) => payload.extend_from_slice(&output_bytes(&item.line)),
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            if !payload.is_empty() {
                let frame = Frame::new(FrameType::Stdout, session_id.clone(), payload);
                if !send_frame(&out_tx, &frame).await {
                    break;
                }
            }
            if closed {
                break;
            }
        }
        sub.detach().await;
    });
}

/// Extract raw output bytes from one stream line.
fn output_bytes(line: &str) -> Vec<u8> {
    match parse_line(line) {
        Some(StreamEvent::Output { data, .. }) => data.into_bytes(),
        _ => Vec::new(),
    }
}

/// Push binary snapshots: the first eagerly, then one per coalescing window
/// while the emulator keeps changing.
fn spawn_snapshot_task(
    handle: Arc<SessionHandle>,
    session_id: String,
    snap_min_ms: u32,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut dirty_rx = handle.term.subscribe_dirty();
        let window = Duration::from_millis(snap_min_ms as u64);

        let mut last_seq = {
            let emulator = handle.term.emulator.read().await;
            let snap = emulator.snapshot();
            let seq = emulator.seq();
            drop(emulator);
            let frame =
                Frame::new(FrameType::SnapshotVt, session_id.clone(), vtproto::snapshot::encode(&snap));
            if !send_frame(&out_tx, &frame).await {
                return;
            }
            seq
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = dirty_rx.recv() => {
                    match changed {
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(_) => break,
                    }
                }
            }

            // Let further changes land inside the window.
            tokio::time::sleep(window).await;
            while dirty_rx.try_recv().is_ok() {}

            let (snap, seq) = {
                let mut emulator = handle.term.emulator.write().await;
                let snap = emulator.snapshot();
                emulator.clear_bell();
                (snap, emulator.seq())
            };
            if seq == last_seq {
                continue;
            }
            last_seq = seq;
            let frame = Frame::new(
                FrameType::SnapshotVt,
                session_id.clone(),
                vtproto::snapshot::encode(&snap),
            );
            if !send_frame(&out_tx, &frame).await {
                break;
            }
        }
    });
}

/// Forward bus events for one session (or the global channel when
/// `session_id` is empty). Opens with a `connected` event.
fn spawn_events_task(
    events: EventBus,
    session_id: String,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut rx = events.subscribe();

        let connected = serde_json::to_vec(&ServerEvent::Connected).unwrap_or_default();
        let _ =
            send_frame(&out_tx, &Frame::new(FrameType::Event, session_id.clone(), connected))
                .await;

        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                env = rx.recv() => match env {
                    Ok(e) => e,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws event subscriber lagged");
                        continue;
                    }
                    Err(_) => break,
                },
            };

            let matches = match (&envelope.session_id, session_id.is_empty()) {
                (None, true) => true,
                (Some(id), false) => id == &session_id,
                _ => false,
            };
            if !matches {
                continue;
            }

            let is_exit = matches!(envelope.event, ServerEvent::Exit { .. });
            let payload = serde_json::to_vec(&envelope.event).unwrap_or_default();
            if !send_frame(&out_tx, &Frame::new(FrameType::Event, session_id.clone(), payload))
                .await
            {
                break;
            }
            if is_exit {
                // Session over: drain is complete once the exit event is out.
                break;
            }
        }
    });
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
