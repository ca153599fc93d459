// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flow control for the stream-to-emulator feed path.
//!
//! When a session's emulator buffer passes the high watermark the feed
//! detaches its stream subscription and parks; a global scanner wakes parked
//! sessions when utilization falls below the low watermark or the pause
//! timeout expires. The scanner walks paused sessions round-robin so a herd
//! of sessions never resumes in the same tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::state::AppState;

/// Pause above this emulator buffer utilization.
pub const HIGH_WATERMARK: f64 = 0.80;
/// Resume below this utilization.
pub const LOW_WATERMARK: f64 = 0.50;
/// Lines buffered while paused before dropping.
pub const MAX_PENDING_LINES: usize = 10_000;
/// A session paused longer than this is force-resumed.
pub const PAUSE_TIMEOUT: Duration = Duration::from_secs(300);

const SCAN_INTERVAL: Duration = Duration::from_millis(100);

struct PausedEntry {
    since: Instant,
    notify: Arc<Notify>,
}

/// Registry of paused session feeds, scanned by the background ticker.
pub struct FlowController {
    paused: Mutex<HashMap<String, PausedEntry>>,
}

impl FlowController {
    pub fn new() -> Self {
        Self { paused: Mutex::new(HashMap::new()) }
    }

    /// Park a session feed; the returned instant is the pause start.
    pub async fn register_paused(&self, session_id: &str, notify: Arc<Notify>) -> Instant {
        let since = Instant::now();
        self.paused
            .lock()
            .await
            .insert(session_id.to_owned(), PausedEntry { since, notify });
        since
    }

    pub async fn deregister(&self, session_id: &str) {
        self.paused.lock().await.remove(session_id);
    }

    pub async fn paused_count(&self) -> usize {
        self.paused.lock().await.len()
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the global scan ticker. Each tick visits paused sessions in turn
/// and wakes any whose utilization has drained or whose pause timed out.
pub fn spawn_scanner(state: Arc<AppState>) {
    let cancel = state.shutdown.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let entries: Vec<(String, Instant, Arc<Notify>)> = {
                let paused = state.flow.paused.lock().await;
                paused
                    .iter()
                    .map(|(id, e)| (id.clone(), e.since, Arc::clone(&e.notify)))
                    .collect()
            };

            for (session_id, since, notify) in entries {
                let Some(handle) = state.store.get_live(&session_id).await else {
                    // Session is gone; wake the feed so it can observe that.
                    notify.notify_one();
                    continue;
                };
                if since.elapsed() > PAUSE_TIMEOUT {
                    notify.notify_one();
                    continue;
                }
                let utilization = handle.term.emulator.read().await.buffer_utilization();
                if utilization < LOW_WATERMARK {
                    notify.notify_one();
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
