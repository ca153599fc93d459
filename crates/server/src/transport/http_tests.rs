// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler tests over `axum_test::TestServer` — no real TCP, no PTYs.

use super::*;

use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::flow::FlowController;
use crate::hq::RemoteRegistry;
use crate::session::SessionStore;
use crate::state::AppState;
use crate::transport::auth::AuthKeys;
use crate::transport::build_router;

fn test_config(dir: &tempfile::TempDir, hq: bool) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        control_dir: Some(dir.path().to_path_buf()),
        no_auth: true,
        term: "xterm-256color".to_owned(),
        hq,
        hq_url: None,
        hq_token: None,
        name: None,
        advertise_url: None,
    }
}

fn test_state(hq: bool) -> (tempfile::TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().unwrap();
    let state =
        AppState::new(test_config(&dir, hq), CancellationToken::new()).unwrap();
    (dir, Arc::new(state))
}

fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(build_router(state)).expect("failed to create test server")
}

/// Write an exited session record directly to the control dir.
fn seed_exited_session(state: &AppState, name: &str) -> String {
    let (id, _dir) = state.store.allocate().unwrap();
    let info = SessionInfo {
        id: id.clone(),
        name: name.to_owned(),
        command: vec!["true".to_owned()],
        working_dir: "/".to_owned(),
        status: SessionStatus::Exited,
        pid: None,
        exit_code: Some(0),
        started_at: "2026-07-01T12:00:00.000Z".to_owned(),
        initial_cols: 80,
        initial_rows: 24,
        title_mode: TitleMode::None,
        term: "xterm-256color".to_owned(),
        spawn_type: "pty".to_owned(),
    };
    state.store.persist(&info).unwrap();
    id
}

#[tokio::test]
async fn health_is_open() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);
    let resp = server.get("/api/health").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["status"], "ok");
}

#[tokio::test]
async fn server_status_reports_hq_mode() {
    let (_dir, state) = test_state(true);
    let server = test_server(state);
    let body: serde_json::Value = server.get("/api/server/status").await.json();
    assert_eq!(body["isHQMode"], true);
    assert_eq!(body["macAppConnected"], false);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn session_list_starts_empty() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);
    let resp = server.get("/api/sessions").await;
    resp.assert_status_ok();
    assert!(resp.json::<Vec<serde_json::Value>>().is_empty());
}

#[tokio::test]
async fn create_rejects_empty_command() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);
    let resp =
        server.post("/api/sessions").json(&serde_json::json!({"command": []})).await;
    resp.assert_status_bad_request();
}

#[tokio::test]
async fn create_rejects_out_of_range_dimensions() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);
    let resp = server
        .post("/api/sessions")
        .json(&serde_json::json!({"command": ["true"], "cols": 0, "rows": 24}))
        .await;
    resp.assert_status_bad_request();

    let resp = server
        .post("/api/sessions")
        .json(&serde_json::json!({"command": ["true"], "cols": 80, "rows": 1001}))
        .await;
    resp.assert_status_bad_request();
}

#[tokio::test]
async fn resize_validates_bounds_before_lookup() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);
    let resp = server
        .post("/api/sessions/nope/resize")
        .json(&serde_json::json!({"cols": 0, "rows": 24}))
        .await;
    resp.assert_status_bad_request();

    let resp = server
        .post("/api/sessions/nope/resize")
        .json(&serde_json::json!({"cols": 80, "rows": 24}))
        .await;
    resp.assert_status_not_found();
}

#[tokio::test]
async fn input_requires_exactly_one_of_text_or_key() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);

    let resp =
        server.post("/api/sessions/nope/input").json(&serde_json::json!({})).await;
    resp.assert_status_bad_request();

    let resp = server
        .post("/api/sessions/nope/input")
        .json(&serde_json::json!({"text": "x", "key": "enter"}))
        .await;
    resp.assert_status_bad_request();

    let resp = server
        .post("/api/sessions/nope/input")
        .json(&serde_json::json!({"key": "no_such_key"}))
        .await;
    resp.assert_status_bad_request();

    let resp = server
        .post("/api/sessions/nope/input")
        .json(&serde_json::json!({"text": "hello"}))
        .await;
    resp.assert_status_not_found();
}

#[tokio::test]
async fn unknown_session_is_404() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);
    server.get("/api/sessions/missing").await.assert_status_not_found();
    server.delete("/api/sessions/missing").await.assert_status_not_found();
    server.get("/api/sessions/missing/buffer").await.assert_status_not_found();
    server.get("/api/sessions/missing/text").await.assert_status_not_found();
    server.post("/api/sessions/missing/reset-size").await.assert_status_not_found();
}

#[tokio::test]
async fn exited_session_listed_then_cleaned() {
    let (_dir, state) = test_state(false);
    let id = seed_exited_session(&state, "done");
    let server = test_server(Arc::clone(&state));

    let list: Vec<serde_json::Value> = server.get("/api/sessions").await.json();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id.as_str());
    assert_eq!(list[0]["status"], "exited");
    assert_eq!(list[0]["source"], "local");

    let body: serde_json::Value = server.post("/api/cleanup-exited").await.json();
    assert_eq!(body["cleanedSessions"], serde_json::json!([id]));

    // Idempotent.
    let body: serde_json::Value = server.post("/api/cleanup-exited").await.json();
    assert_eq!(body["cleanedSessions"], serde_json::json!([]));
}

#[tokio::test]
async fn delete_on_exited_session_cleans_up() {
    let (_dir, state) = test_state(false);
    let id = seed_exited_session(&state, "done");
    let server = test_server(Arc::clone(&state));

    let resp = server.delete(&format!("/api/sessions/{id}")).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Session cleaned up");
    assert!(state.store.load(&id).is_none());
}

#[tokio::test]
async fn rename_updates_record() {
    let (_dir, state) = test_state(false);
    let id = seed_exited_session(&state, "old-name");
    let server = test_server(Arc::clone(&state));

    let resp = server
        .patch(&format!("/api/sessions/{id}"))
        .json(&serde_json::json!({"name": "new-name"}))
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["name"], "new-name");
    assert_eq!(state.store.load(&id).unwrap().name, "new-name");
}

#[tokio::test]
async fn rename_rejects_oversized_name() {
    let (_dir, state) = test_state(false);
    let id = seed_exited_session(&state, "x");
    let server = test_server(state);
    let resp = server
        .patch(&format!("/api/sessions/{id}"))
        .json(&serde_json::json!({"name": "n".repeat(300)}))
        .await;
    resp.assert_status_bad_request();
}

#[tokio::test]
async fn remote_endpoints_require_hq_mode() {
    let (_dir, state) = test_state(false);
    let server = test_server(state);
    server.get("/api/remotes").await.assert_status_bad_request();
    server
        .post("/api/remotes/register")
        .json(&serde_json::json!({"id": "1", "name": "p", "url": "http://x"}))
        .await
        .assert_status_bad_request();
    server.delete("/api/remotes/p").await.assert_status_bad_request();
}

#[tokio::test]
async fn register_unreachable_peer_is_503() {
    let (_dir, state) = test_state(true);
    let server = test_server(state);
    let resp = server
        .post("/api/remotes/register")
        .json(&serde_json::json!({
            "id": "r1",
            "name": "ghost",
            "url": "http://127.0.0.1:1",
            "token": "t",
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unregister_unknown_remote_is_404() {
    let (_dir, state) = test_state(true);
    let server = test_server(state);
    server.delete("/api/remotes/ghost").await.assert_status_not_found();
}

#[tokio::test]
async fn auth_gates_api_but_not_health() {
    let dir = tempfile::tempdir().unwrap();
    let auth = AuthKeys::from_secret("gate-test");
    let token = auth.issue("tester", 600).unwrap();
    let state = Arc::new(AppState {
        config: test_config(&dir, false),
        store: SessionStore::new(dir.path().to_path_buf()).unwrap(),
        remotes: RemoteRegistry::new(),
        events: EventBus::new(),
        flow: Arc::new(FlowController::new()),
        auth,
        shutdown: CancellationToken::new(),
        started_at: std::time::Instant::now(),
    });
    let server = test_server(state);

    server.get("/api/health").await.assert_status_ok();
    server.get("/api/sessions").await.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let resp = server.get("/api/sessions").authorization_bearer(&token).await;
    resp.assert_status_ok();

    let resp = server.get(&format!("/api/sessions?token={token}")).await;
    resp.assert_status_ok();
}
