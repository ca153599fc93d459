// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session tests: real PTYs driven through the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use vibetunnel::config::ServerConfig;
use vibetunnel::state::AppState;
use vibetunnel::transport::build_router;

fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ServerConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        control_dir: Some(dir.path().to_path_buf()),
        no_auth: true,
        term: "xterm-256color".to_owned(),
        hq: false,
        hq_url: None,
        hq_token: None,
        name: None,
        advertise_url: None,
    };
    let state = AppState::new(config, CancellationToken::new()).expect("state");
    (dir, Arc::new(state))
}

fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(build_router(state)).expect("test server")
}

async fn create_session(server: &TestServer, body: serde_json::Value) -> String {
    let resp = server.post("/api/sessions").json(&body).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    body["sessionId"].as_str().expect("sessionId").to_owned()
}

/// Poll the session record until `pred` holds or the deadline passes.
async fn wait_for_session(
    server: &TestServer,
    id: &str,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    for _ in 0..100 {
        let resp = server.get(&format!("/api/sessions/{id}")).await;
        if resp.status_code().is_success() {
            let body: serde_json::Value = resp.json();
            if pred(&body) {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("session {id} never reached the expected state");
}

#[tokio::test]
async fn echo_session_runs_to_exit() {
    let (dir, state) = test_state();
    let server = test_server(state);

    let id = create_session(
        &server,
        serde_json::json!({"command": ["/bin/echo", "hi"], "cols": 80, "rows": 24}),
    )
    .await;

    let body =
        wait_for_session(&server, &id, |s| s["status"] == "exited").await;
    assert_eq!(body["exitCode"], 0);
    assert_eq!(body["spawnType"], "pty");
    let started_at = body["startedAt"].as_str().expect("startedAt is a string");
    assert!(started_at.ends_with('Z') && started_at.contains('T'));

    // The stream file holds the header, the output, and the exit terminator.
    let stdout = std::fs::read_to_string(dir.path().join(&id).join("stdout")).unwrap();
    assert!(stdout.contains("hi"));
    assert!(stdout.contains("\"exit\""));
    let first_line: serde_json::Value =
        serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(first_line["version"], 2);
    assert_eq!(first_line["width"], 80);
}

#[tokio::test]
async fn input_reaches_cat_session() {
    let (_dir, state) = test_state();
    let server = test_server(state);

    let id =
        create_session(&server, serde_json::json!({"command": ["/bin/cat"]})).await;
    wait_for_session(&server, &id, |s| s["status"] == "running").await;

    let resp = server
        .post(&format!("/api/sessions/{id}/input"))
        .json(&serde_json::json!({"text": "hello\n"}))
        .await;
    resp.assert_status_ok();

    // cat echoes the line back; the emulator picks it up from the stream.
    for _ in 0..100 {
        let text = server.get(&format!("/api/sessions/{id}/text")).await;
        if text.status_code().is_success() && text.text().contains("hello") {
            server.delete(&format!("/api/sessions/{id}")).await.assert_status_ok();
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("cat session never echoed input");
}

#[tokio::test]
async fn resize_updates_buffer_and_stream() {
    let (dir, state) = test_state();
    let server = test_server(state);

    let id = create_session(
        &server,
        serde_json::json!({"command": ["/bin/cat"], "cols": 80, "rows": 24}),
    )
    .await;
    wait_for_session(&server, &id, |s| s["status"] == "running").await;

    let resp = server
        .post(&format!("/api/sessions/{id}/resize"))
        .json(&serde_json::json!({"cols": 100, "rows": 30}))
        .await;
    resp.assert_status_ok();

    // The emulator resizes once the r event flows through the stream file.
    let mut resized = false;
    for _ in 0..100 {
        let resp = server.get(&format!("/api/sessions/{id}/buffer")).await;
        if resp.status_code().is_success() {
            let snap = vtproto::snapshot::decode(resp.as_bytes()).expect("decode snapshot");
            if snap.cols == 100 && snap.rows == 30 {
                resized = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(resized, "buffer never reported the new dimensions");

    let stdout = std::fs::read_to_string(dir.path().join(&id).join("stdout")).unwrap();
    assert!(stdout.contains("100x30"));

    server.delete(&format!("/api/sessions/{id}")).await.assert_status_ok();
}

#[tokio::test]
async fn kill_flips_session_to_exited() {
    let (dir, state) = test_state();
    let server = test_server(state);

    let id =
        create_session(&server, serde_json::json!({"command": ["/bin/cat"]})).await;
    wait_for_session(&server, &id, |s| s["status"] == "running").await;

    let resp = server.delete(&format!("/api/sessions/{id}")).await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["message"], "Session killed");

    wait_for_session(&server, &id, |s| s["status"] == "exited").await;

    // The IPC socket is gone but the control dir survives until cleanup.
    assert!(!dir.path().join(&id).join("ipc.sock").exists());
    assert!(dir.path().join(&id).join("stdout").exists());
}

#[tokio::test]
async fn buffer_snapshot_contains_output() {
    let (_dir, state) = test_state();
    let server = test_server(state);

    let id =
        create_session(&server, serde_json::json!({"command": ["/bin/cat"]})).await;
    wait_for_session(&server, &id, |s| s["status"] == "running").await;

    server
        .post(&format!("/api/sessions/{id}/input"))
        .json(&serde_json::json!({"text": "marker\n"}))
        .await
        .assert_status_ok();

    let mut seen = false;
    for _ in 0..100 {
        let resp = server.get(&format!("/api/sessions/{id}/buffer")).await;
        if resp.status_code().is_success() {
            let snap = vtproto::snapshot::decode(resp.as_bytes()).expect("decode snapshot");
            let text: String = snap
                .grid
                .iter()
                .flat_map(|row| row.cells.iter())
                .map(|c| c.ch.as_str())
                .collect();
            if text.contains("marker") {
                seen = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(seen, "snapshot never showed the echoed input");

    server.delete(&format!("/api/sessions/{id}")).await.assert_status_ok();
}

#[tokio::test]
async fn ipc_socket_accepts_control_frames() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use vibetunnel::ipc::{encode_frame, FRAME_CONTROL, FRAME_STDIN};

    let (dir, state) = test_state();
    let server = test_server(state);

    let id =
        create_session(&server, serde_json::json!({"command": ["/bin/cat"]})).await;
    wait_for_session(&server, &id, |s| s["status"] == "running").await;

    let sock_path = dir.path().join(&id).join("ipc.sock");
    let mut stream = tokio::net::UnixStream::connect(&sock_path).await.expect("connect ipc");

    // Resize lands in the stream file as an r event.
    let resize = encode_frame(FRAME_CONTROL, br#"{"cmd":"resize","cols":90,"rows":25}"#);
    stream.write_all(&resize).await.unwrap();

    let mut resized = false;
    for _ in 0..100 {
        let stdout =
            std::fs::read_to_string(dir.path().join(&id).join("stdout")).unwrap();
        if stdout.contains("90x25") {
            resized = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(resized, "resize never reached the stream file");

    // Stdin frames reach the child (cat echoes them back as output).
    let stdin = encode_frame(FRAME_STDIN, b"via-ipc\n");
    stream.write_all(&stdin).await.unwrap();
    let mut echoed = false;
    for _ in 0..100 {
        let text = server.get(&format!("/api/sessions/{id}/text")).await;
        if text.status_code().is_success() && text.text().contains("via-ipc") {
            echoed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(echoed, "stdin frame never reached the child");

    // update-title answers on the same socket with the final name.
    let update = encode_frame(FRAME_CONTROL, br#"{"cmd":"update-title","name":"renamed"}"#);
    stream.write_all(&update).await.unwrap();
    let mut reply = vec![0u8; 512];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut reply))
        .await
        .expect("reply deadline")
        .expect("reply read");
    assert!(n > 5);
    let payload: serde_json::Value = serde_json::from_slice(&reply[5..n]).unwrap();
    assert_eq!(payload["cmd"], "update-title");
    assert_eq!(payload["name"], "renamed");

    server.delete(&format!("/api/sessions/{id}")).await.assert_status_ok();
}

#[tokio::test]
async fn sessions_list_reports_live_session() {
    let (_dir, state) = test_state();
    let server = test_server(state);

    let id =
        create_session(&server, serde_json::json!({"command": ["/bin/cat"], "name": "listed"}))
            .await;
    wait_for_session(&server, &id, |s| s["status"] == "running").await;

    let list: Vec<serde_json::Value> = server.get("/api/sessions").await.json();
    let entry = list.iter().find(|s| s["id"] == id.as_str()).expect("session listed");
    assert_eq!(entry["name"], "listed");
    assert_eq!(entry["source"], "local");
    assert!(entry["pid"].as_i64().unwrap() > 0);

    server.delete(&format!("/api/sessions/{id}")).await.assert_status_ok();
}
