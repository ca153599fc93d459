// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn events_serialize_with_kind_tag() {
    let json = serde_json::to_value(ServerEvent::Bell).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "bell"}));

    let json = serde_json::to_value(ServerEvent::Exit { exit_code: 3 }).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "exit", "exitCode": 3}));

    let json =
        serde_json::to_value(ServerEvent::SessionStart { session_id: "abc".to_owned() }).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "session-start", "sessionId": "abc"}));
}

#[tokio::test]
async fn session_events_carry_channel() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    bus.emit_session("s1", ServerEvent::Bell);
    let env = rx.recv().await.unwrap();
    assert_eq!(env.session_id.as_deref(), Some("s1"));

    bus.emit_global(ServerEvent::SessionExit {
        session_id: "s1".to_owned(),
        exit_code: 0,
    });
    let env = rx.recv().await.unwrap();
    assert!(env.session_id.is_none());
}

#[tokio::test]
async fn emit_without_subscribers_is_fine() {
    let bus = EventBus::new();
    bus.emit_global(ServerEvent::Connected);
}
