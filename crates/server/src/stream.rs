// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tails one growing asciinema stream file and fans whole lines out to N
//! subscribers. Uses `notify` for filesystem events with a 100 ms polling
//! fallback. The first attach starts the tail task; when the last
//! subscriber is gone the file and watcher are released.

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::asciinema;

/// Polling fallback interval for file growth.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where a new subscriber's replay begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// Replay from the most recent full-screen clear (scanned from the file).
    LastClear,
    /// Replay from an explicit byte offset (flow-control resume).
    Offset(u64),
    /// No replay; live lines only.
    End,
}

/// One delivered stream line plus the file offset just past it.
#[derive(Debug, Clone)]
pub struct StreamLine {
    pub line: Arc<str>,
    /// Byte offset of the first byte after this line's newline.
    pub offset: u64,
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::UnboundedSender<StreamLine>,
}

struct WatchState {
    subscribers: Vec<SubscriberSlot>,
    next_id: u64,
    /// Read offset of the live tail (whole lines consumed so far).
    offset: u64,
    tail_cancel: Option<CancellationToken>,
}

/// Fan-out tailer for one session's `stdout` file.
pub struct StreamWatcher {
    path: PathBuf,
    state: Mutex<WatchState>,
}

/// A live subscription; dropping the receiver detaches lazily, `detach`
/// releases promptly.
pub struct StreamSubscription {
    pub rx: mpsc::UnboundedReceiver<StreamLine>,
    watcher: Arc<StreamWatcher>,
    id: u64,
}

impl StreamSubscription {
    /// Remove this subscriber; stops the tail task if it was the last one.
    pub async fn detach(self) {
        self.watcher.remove_subscriber(self.id).await;
    }
}

impl StreamWatcher {
    pub fn new(path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            path,
            state: Mutex::new(WatchState {
                subscribers: Vec::new(),
                next_id: 1,
                offset: 0,
                tail_cancel: None,
            }),
        })
    }

    /// Byte offset of the live tail. Lines below this offset have been
    /// dispatched to current subscribers.
    pub async fn current_offset(&self) -> u64 {
        self.state.lock().await.offset
    }

    /// Attach a subscriber, replaying history per `start` before going live.
    pub async fn attach(self: &Arc<Self>, start: StartAt) -> StreamSubscription {
        let mut state = self.state.lock().await;

        // Starting the tail pins the live offset at EOF; replay covers
        // everything before it while we still hold the lock, so no line is
        // missed or duplicated.
        if state.tail_cancel.is_none() {
            let file_len = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
            state.offset = file_len;
            let cancel = CancellationToken::new();
            state.tail_cancel = Some(cancel.clone());
            tokio::spawn(Arc::clone(self).tail_loop(cancel));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();

        let replay_from = match start {
            StartAt::LastClear => {
                Some(asciinema::scan_last_clear_offset(&self.path).unwrap_or(0))
            }
            StartAt::Offset(n) => Some(n),
            StartAt::End => None,
        };
        if let Some(from) = replay_from {
            let upto = state.offset;
            if from < upto {
                for item in read_lines_between(&self.path, from, upto) {
                    let _ = tx.send(item);
                }
            }
        }

        state.subscribers.push(SubscriberSlot { id, tx });
        drop(state);

        StreamSubscription { rx, watcher: Arc::clone(self), id }
    }

    async fn remove_subscriber(&self, id: u64) {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|s| s.id != id);
        if state.subscribers.is_empty() {
            if let Some(cancel) = state.tail_cancel.take() {
                cancel.cancel();
            }
        }
    }

    /// Tail task: wake on filesystem events or the poll interval, read new
    /// whole lines, dispatch to subscribers. A subscriber whose channel is
    /// closed is dropped without disturbing the others.
    async fn tail_loop(self: Arc<Self>, cancel: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.setup_notify_watcher(wake_tx);
        let mut poll = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll.tick() => {}
            }

            let mut state = self.state.lock().await;
            if state.subscribers.is_empty() {
                // All subscribers were pruned; let the next attach restart us.
                state.tail_cancel = None;
                break;
            }
            let (lines, new_offset) = match read_new_lines(&self.path, state.offset) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), err = %e, "stream read failed");
                    continue;
                }
            };
            state.offset = new_offset;
            for item in lines {
                state.subscribers.retain(|s| s.tx.send(item.clone()).is_ok());
            }
        }
    }

    /// Watch the parent directory so file creation is seen too.
    fn setup_notify_watcher(
        &self,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;
        let watch_path = self.path.parent().unwrap_or(self.path.as_ref());
        watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

/// Read complete lines appended after `offset`. A trailing partial line is
/// left unconsumed for the next read.
fn read_new_lines(
    path: &std::path::Path,
    mut offset: u64,
) -> std::io::Result<(Vec<StreamLine>, u64)> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((vec![], offset)),
        Err(e) => return Err(e),
    };

    // File shrank below our offset: treat as truncation and restart.
    if file.metadata()?.len() < offset {
        offset = 0;
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut lines = Vec::new();
    let mut consumed = 0usize;
    while let Some(nl) = buf[consumed..].iter().position(|&b| b == b'\n') {
        let end = consumed + nl;
        let line = String::from_utf8_lossy(&buf[consumed..end]);
        consumed = end + 1;
        let line_offset = offset + consumed as u64;
        if !line.trim().is_empty() {
            lines.push(StreamLine { line: Arc::from(line.as_ref()), offset: line_offset });
        }
    }

    Ok((lines, offset + consumed as u64))
}

/// Read complete lines in the byte range `[from, upto)` for replay.
fn read_lines_between(path: &std::path::Path, from: u64, upto: u64) -> Vec<StreamLine> {
    let (lines, _) = match read_new_lines(path, from) {
        Ok(r) => r,
        Err(_) => return vec![],
    };
    lines.into_iter().filter(|l| l.offset <= upto).collect()
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
