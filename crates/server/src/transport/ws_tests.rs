// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn output_bytes_extracts_o_event_data() {
    let line = serde_json::json!([0.5, "o", "hello\u{1b}[1m"]).to_string();
    assert_eq!(output_bytes(&line), "hello\u{1b}[1m".as_bytes());
}

#[test]
fn output_bytes_skips_non_output_events() {
    let resize = serde_json::json!([0.5, "r", "100x30"]).to_string();
    assert!(output_bytes(&resize).is_empty());

    let input = serde_json::json!([0.5, "i", "typed"]).to_string();
    assert!(output_bytes(&input).is_empty());

    let exit = serde_json::json!(["exit", 0, "sess"]).to_string();
    assert!(output_bytes(&exit).is_empty());

    assert!(output_bytes("garbage").is_empty());
}

#[test]
fn welcome_frame_is_global_json() {
    let frame = Frame::new(
        FrameType::Welcome,
        "",
        serde_json::json!({"ok": true, "version": 3}).to_string().into_bytes(),
    );
    let decoded = vtproto::frame::decode(&vtproto::frame::encode(&frame)).unwrap();
    assert_eq!(decoded.session_id, "");
    let body: serde_json::Value = serde_json::from_slice(&decoded.payload).unwrap();
    assert_eq!(body["version"], 3);
}
