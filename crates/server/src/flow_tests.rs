// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use tokio::sync::Notify;

#[tokio::test]
async fn register_and_deregister() {
    let flow = FlowController::new();
    assert_eq!(flow.paused_count().await, 0);

    let notify = Arc::new(Notify::new());
    flow.register_paused("s1", Arc::clone(&notify)).await;
    assert_eq!(flow.paused_count().await, 1);

    flow.deregister("s1").await;
    assert_eq!(flow.paused_count().await, 0);
}

#[tokio::test]
async fn reregistration_replaces_entry() {
    let flow = FlowController::new();
    let first = Arc::new(Notify::new());
    let second = Arc::new(Notify::new());
    flow.register_paused("s1", first).await;
    flow.register_paused("s1", second).await;
    assert_eq!(flow.paused_count().await, 1);
}

#[test]
fn watermark_constants_are_ordered() {
    assert!(LOW_WATERMARK < HIGH_WATERMARK);
    assert!(HIGH_WATERMARK < 1.0);
    assert_eq!(MAX_PENDING_LINES, 10_000);
    assert_eq!(PAUSE_TIMEOUT.as_secs(), 300);
}
