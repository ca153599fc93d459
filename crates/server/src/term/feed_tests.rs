// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::time::Duration;

use crate::asciinema::{AsciinemaHeader, AsciinemaWriter};
use crate::stream::StreamWatcher;

struct Fixture {
    _dir: tempfile::TempDir,
    writer: AsciinemaWriter,
    feed: Arc<TerminalFeed>,
    flow: Arc<FlowController>,
    cancel: CancellationToken,
}

fn start_fixture(title_mode: TitleMode) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stdout");
    let writer = AsciinemaWriter::create(&path, &AsciinemaHeader::new(40, 10)).unwrap();

    let feed = TerminalFeed::new(40, 10);
    let watcher = StreamWatcher::new(path);
    let flow = Arc::new(FlowController::new());
    let events = EventBus::new();
    let cancel = CancellationToken::new();
    spawn_feed(
        "feed-test".to_owned(),
        Arc::clone(&feed),
        watcher,
        Arc::clone(&flow),
        events,
        title_mode,
        cancel.clone(),
    );
    Fixture { _dir: dir, writer, feed, flow, cancel }
}

async fn wait_for_seq(feed: &TerminalFeed, min_seq: u64) {
    let mut rx = feed.subscribe_dirty();
    for _ in 0..50 {
        if feed.emulator.read().await.seq() >= min_seq {
            return;
        }
        let _ = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    }
    panic!("emulator never reached seq {min_seq}");
}

#[tokio::test]
async fn output_events_reach_emulator() {
    let mut fx = start_fixture(TitleMode::None);
    fx.writer.write_output(b"hello feed").unwrap();

    wait_for_seq(&fx.feed, 1).await;
    let snap = fx.feed.snapshot().await;
    let text: String = snap.grid[0].cells.iter().map(|c| c.ch.as_str()).collect();
    assert_eq!(text, "hello feed");
    fx.cancel.cancel();
}

#[tokio::test]
async fn resize_events_resize_emulator() {
    let mut fx = start_fixture(TitleMode::None);
    fx.writer.write_output(b"x").unwrap();
    fx.writer.write_resize(100, 30).unwrap();

    wait_for_seq(&fx.feed, 2).await;
    let emulator = fx.feed.emulator.read().await;
    assert_eq!(emulator.size(), (100, 30));
    drop(emulator);
    fx.cancel.cancel();
}

#[tokio::test]
async fn filter_mode_strips_titles() {
    let mut fx = start_fixture(TitleMode::Filter);
    fx.writer.write_output(b"\x1b]0;secret title\x07visible").unwrap();

    wait_for_seq(&fx.feed, 1).await;
    let snap = fx.feed.snapshot().await;
    let text: String = snap.grid[0].cells.iter().map(|c| c.ch.as_str()).collect();
    assert_eq!(text, "visible");
    fx.cancel.cancel();
}

#[tokio::test]
async fn feed_parks_above_high_watermark() {
    let mut fx = start_fixture(TitleMode::None);
    // Push enough scrolled lines that (scrollback + rows) / 10_000 > 0.8.
    for _ in 0..900 {
        let chunk = "line\r\n".repeat(10);
        fx.writer.write_output(chunk.as_bytes()).unwrap();
    }

    let mut parked = false;
    for _ in 0..100 {
        if fx.flow.paused_count().await == 1 {
            parked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(parked, "feed never registered as paused");
    assert!(fx.feed.emulator.read().await.buffer_utilization() > HIGH_WATERMARK);
    fx.cancel.cancel();
}

#[tokio::test]
async fn input_events_are_ignored() {
    let mut fx = start_fixture(TitleMode::None);
    fx.writer.write_input(b"typed").unwrap();
    fx.writer.write_output(b"shown").unwrap();

    wait_for_seq(&fx.feed, 1).await;
    let snap = fx.feed.snapshot().await;
    let text: String = snap.grid[0].cells.iter().map(|c| c.ch.as_str()).collect();
    assert_eq!(text, "shown");
    fx.cancel.cancel();
}
