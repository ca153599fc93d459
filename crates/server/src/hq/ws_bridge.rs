// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket bridge for one remote session: a single upstream connection to
//! the peer's `/ws`, multiplexed to N local subscriber connections.
//!
//! Frames pass through verbatim in both directions (the peer speaks the
//! same v3 framing). SUBSCRIBE frames are remembered per client and
//! replayed after an upstream reconnect so subscriptions survive peer
//! restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use vtproto::frame::{self, FrameType};

pub type ClientId = u64;

struct ClientSlot {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Last SUBSCRIBE frame, replayed after reconnect.
    subscribe: Option<Vec<u8>>,
}

/// Bridge for one `(remote, session)` pair.
pub struct WsBridge {
    upstream_tx: mpsc::UnboundedSender<(ClientId, Vec<u8>)>,
    clients: Arc<RwLock<HashMap<ClientId, ClientSlot>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl WsBridge {
    /// Connect to the peer's `/ws` and start relaying.
    pub fn connect(ws_url: String, session_id: String, parent: &CancellationToken) -> Arc<Self> {
        let cancel = parent.child_token();
        let clients: Arc<RwLock<HashMap<ClientId, ClientSlot>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();

        let bridge = Arc::new(Self {
            upstream_tx,
            clients: Arc::clone(&clients),
            next_id: AtomicU64::new(1),
            cancel: cancel.clone(),
        });

        tokio::spawn(run_loop(ws_url, session_id, cancel, clients, upstream_rx));
        bridge
    }

    /// Register a local subscriber; frames from the peer arrive on the
    /// returned receiver.
    pub async fn add_client(&self) -> (ClientId, mpsc::UnboundedReceiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().await.insert(id, ClientSlot { tx, subscribe: None });
        (id, rx)
    }

    pub async fn remove_client(&self, id: ClientId) {
        let mut clients = self.clients.write().await;
        clients.remove(&id);
        if clients.is_empty() {
            self.cancel.cancel();
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Forward a client frame to the peer. SUBSCRIBE frames are also
    /// remembered for reconnect replay.
    pub async fn send_upstream(&self, client_id: ClientId, raw: Vec<u8>) {
        if let Ok(decoded) = frame::decode(&raw) {
            if decoded.frame_type == FrameType::Subscribe {
                if let Some(slot) = self.clients.write().await.get_mut(&client_id) {
                    slot.subscribe = Some(raw.clone());
                }
            }
        }
        let _ = self.upstream_tx.send((client_id, raw));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn run_loop(
    url: String,
    session_id: String,
    cancel: CancellationToken,
    clients: Arc<RwLock<HashMap<ClientId, ClientSlot>>>,
    mut downstream_rx: mpsc::UnboundedReceiver<(ClientId, Vec<u8>)>,
) {
    let mut backoff_ms = 100u64;
    let max_backoff_ms = 5000u64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                backoff_ms = 100;
                tracing::debug!(session_id = %session_id, "remote WS connected");
                let (mut write, mut read) = ws_stream.split();

                // Replay live subscriptions lost with the old connection.
                let subs: Vec<Vec<u8>> = clients
                    .read()
                    .await
                    .values()
                    .filter_map(|slot| slot.subscribe.clone())
                    .collect();
                let mut resend_failed = false;
                for sub in subs {
                    if write.send(Message::Binary(sub.into())).await.is_err() {
                        resend_failed = true;
                        break;
                    }
                }
                if resend_failed {
                    continue;
                }

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,

                        // Peer -> local subscribers (frames relayed as-is).
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Binary(data))) => {
                                    let data = data.to_vec();
                                    let guard = clients.read().await;
                                    for slot in guard.values() {
                                        let _ = slot.tx.send(data.clone());
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::debug!(session_id = %session_id, "remote WS closed");
                                    break;
                                }
                                Some(Err(e)) => {
                                    tracing::debug!(session_id = %session_id, err = %e, "remote WS error");
                                    break;
                                }
                                _ => {}
                            }
                        }

                        // Local subscriber -> peer.
                        msg = downstream_rx.recv() => {
                            match msg {
                                Some((_client_id, raw)) => {
                                    if write.send(Message::Binary(raw.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(
                    session_id = %session_id,
                    err = %e,
                    backoff_ms,
                    "remote WS connect failed, retrying"
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)) => {}
        }
        backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
    }
}
