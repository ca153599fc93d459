// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-wide event bus.
//!
//! Events are tagged variants keyed on `kind`; the WebSocket hub serializes
//! them verbatim into EVENT frame payloads.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event published on a session channel or the global channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Subscription established.
    Connected,
    /// BEL seen in session output.
    Bell,
    /// The session's child process exited.
    #[serde(rename_all = "camelCase")]
    Exit { exit_code: i32 },
    /// A session started (global channel).
    #[serde(rename_all = "camelCase")]
    SessionStart { session_id: String },
    /// A session exited (global channel).
    #[serde(rename_all = "camelCase")]
    SessionExit { session_id: String, exit_code: i32 },
    /// Flow control dropped queued output for a session.
    #[serde(rename_all = "camelCase")]
    FlowWarning { session_id: String, dropped_lines: usize },
}

/// An event plus its channel: `Some(id)` targets one session's subscribers,
/// `None` targets the global channel.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub session_id: Option<String>,
    pub event: ServerEvent,
}

/// Broadcast fan-out of [`ServerEvent`]s to WebSocket subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publish an event on one session's channel.
    pub fn emit_session(&self, session_id: &str, event: ServerEvent) {
        let _ = self.tx.send(EventEnvelope { session_id: Some(session_id.to_owned()), event });
    }

    /// Publish a server-wide event on the global channel.
    pub fn emit_global(&self, event: ServerEvent) {
        let _ = self.tx.send(EventEnvelope { session_id: None, event });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
