// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session feed task: tails the session's stream file into the emulator
//! and publishes dirty notifications for snapshot subscribers. The feed is
//! the one consumer governed by flow control.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::asciinema::{parse_line, StreamEvent};
use crate::events::{EventBus, ServerEvent};
use crate::flow::{FlowController, HIGH_WATERMARK, LOW_WATERMARK, MAX_PENDING_LINES, PAUSE_TIMEOUT};
use crate::session::TitleMode;
use crate::stream::{StartAt, StreamLine, StreamSubscription, StreamWatcher};
use crate::term::{strip_title_sequences, Emulator};

/// Shared emulator state for one session plus its dirty channel.
pub struct TerminalFeed {
    pub emulator: RwLock<Emulator>,
    dirty_tx: broadcast::Sender<u64>,
}

impl TerminalFeed {
    pub fn new(cols: u16, rows: u16) -> Arc<Self> {
        let (dirty_tx, _) = broadcast::channel(256);
        Arc::new(Self { emulator: RwLock::new(Emulator::new(cols, rows)), dirty_tx })
    }

    /// Subscribe to emulator sequence bumps.
    pub fn subscribe_dirty(&self) -> broadcast::Receiver<u64> {
        self.dirty_tx.subscribe()
    }

    pub async fn snapshot(&self) -> vtproto::snapshot::BufferSnapshot {
        self.emulator.read().await.snapshot()
    }
}

/// Spawn the feed task for a session.
pub fn spawn_feed(
    session_id: String,
    feed: Arc<TerminalFeed>,
    watcher: Arc<StreamWatcher>,
    flow: Arc<FlowController>,
    events: EventBus,
    title_mode: TitleMode,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut sub = watcher.attach(StartAt::LastClear).await;
        let mut last_offset = watcher.current_offset().await;

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = sub.rx.recv() => line,
            };
            let Some(item) = line else { break };
            last_offset = item.offset;

            let exited = process_line(&session_id, &feed, &events, title_mode, &item).await;
            if exited {
                break;
            }

            let utilization = feed.emulator.read().await.buffer_utilization();
            if utilization > HIGH_WATERMARK {
                sub = match pause_and_resume(
                    &session_id,
                    &feed,
                    &watcher,
                    &flow,
                    &events,
                    title_mode,
                    sub,
                    &mut last_offset,
                    &cancel,
                )
                .await
                {
                    Some(s) => s,
                    None => return,
                };
            }
        }

        sub.detach().await;
    });
}

/// Apply one stream line to the emulator. Returns true when the stream has
/// reached its exit terminator.
async fn process_line(
    session_id: &str,
    feed: &TerminalFeed,
    events: &EventBus,
    title_mode: TitleMode,
    item: &StreamLine,
) -> bool {
    match parse_line(&item.line) {
        Some(StreamEvent::Output { data, .. }) => {
            let bytes = if title_mode == TitleMode::Filter {
                strip_title_sequences(data.as_bytes())
            } else {
                data.into_bytes()
            };
            let (bell, seq) = {
                let mut emu = feed.emulator.write().await;
                let bell = emu.feed(&bytes);
                (bell, emu.seq())
            };
            if bell {
                events.emit_session(session_id, ServerEvent::Bell);
            }
            let _ = feed.dirty_tx.send(seq);
            false
        }
        Some(StreamEvent::Resize { cols, rows, .. }) => {
            let seq = {
                let mut emu = feed.emulator.write().await;
                emu.resize(cols, rows);
                emu.seq()
            };
            let _ = feed.dirty_tx.send(seq);
            false
        }
        Some(StreamEvent::Exit { .. }) => true,
        _ => false,
    }
}

/// Detach from the stream, park until the scanner wakes us, then replay
/// pending lines and reattach from the last consumed offset.
#[allow(clippy::too_many_arguments)]
async fn pause_and_resume(
    session_id: &str,
    feed: &Arc<TerminalFeed>,
    watcher: &Arc<StreamWatcher>,
    flow: &Arc<FlowController>,
    events: &EventBus,
    title_mode: TitleMode,
    mut sub: StreamSubscription,
    last_offset: &mut u64,
    cancel: &CancellationToken,
) -> Option<StreamSubscription> {
    // Drain lines already dispatched to us into the pending queue.
    let mut pending: VecDeque<StreamLine> = VecDeque::new();
    let mut dropped = 0usize;
    while let Ok(item) = sub.rx.try_recv() {
        if pending.len() < MAX_PENDING_LINES {
            *last_offset = item.offset;
            pending.push_back(item);
        } else {
            *last_offset = item.offset;
            dropped += 1;
        }
    }
    sub.detach().await;

    if dropped > 0 {
        tracing::warn!(session_id, dropped, "flow control dropped queued lines");
        events.emit_session(
            session_id,
            ServerEvent::FlowWarning { session_id: session_id.to_owned(), dropped_lines: dropped },
        );
    }

    tracing::debug!(session_id, "flow control paused stream feed");
    let notify = Arc::new(Notify::new());
    let since = flow.register_paused(session_id, Arc::clone(&notify)).await;

    let mut timed_out = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                flow.deregister(session_id).await;
                return None;
            }
            _ = notify.notified() => {}
        }
        if since.elapsed() > PAUSE_TIMEOUT {
            timed_out = true;
            break;
        }
        let utilization = feed.emulator.read().await.buffer_utilization();
        if utilization < LOW_WATERMARK {
            break;
        }
    }
    flow.deregister(session_id).await;

    if timed_out {
        let abandoned = pending.len();
        pending.clear();
        tracing::warn!(session_id, abandoned, "flow control pause timed out, forcing resume");
        events.emit_session(
            session_id,
            ServerEvent::FlowWarning {
                session_id: session_id.to_owned(),
                dropped_lines: abandoned,
            },
        );
    }

    for item in pending {
        process_line(session_id, feed, events, title_mode, &item).await;
    }

    tracing::debug!(session_id, "flow control resumed stream feed");
    Some(watcher.attach(StartAt::Offset(*last_offset)).await)
}

#[cfg(test)]
#[path = "feed_tests.rs"]
mod tests;
