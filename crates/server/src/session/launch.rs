// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session composition: wires the PTY, stream writer, watcher, emulator
//! feed, and IPC socket together, and owns the teardown ordering
//! (subscribers → watcher → session record).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use crate::asciinema::{AsciinemaHeader, AsciinemaWriter};
use crate::events::ServerEvent;
use crate::ipc;
use crate::pty::{PtyCommander, PtyHost};
use crate::state::AppState;
use crate::stream::StreamWatcher;
use crate::term::{spawn_feed, TerminalFeed};

use super::{now_rfc3339, CreateParams, SessionHandle, SessionInfo, SessionStatus};

/// Create and start a session: spawn the child under a PTY, open the
/// asciinema stream, start the feed and IPC tasks, and register the live
/// handle. Returns the persisted record with status `running`.
pub async fn create_session(
    state: &Arc<AppState>,
    params: CreateParams,
) -> anyhow::Result<SessionInfo> {
    let (id, dir) = state.store.allocate()?;

    let desired_name =
        params.name.clone().unwrap_or_else(|| params.command.join(" "));
    let name = state.store.unique_name(&desired_name).await;

    let working_dir = match params.working_dir {
        Some(ref dir) => PathBuf::from(dir),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
    };

    let mut info = SessionInfo {
        id: id.clone(),
        name: name.clone(),
        command: params.command.clone(),
        working_dir: working_dir.display().to_string(),
        status: SessionStatus::Starting,
        pid: None,
        exit_code: None,
        started_at: now_rfc3339(),
        initial_cols: params.cols,
        initial_rows: params.rows,
        title_mode: params.title_mode,
        term: state.config.term.clone(),
        spawn_type: "pty".to_owned(),
    };
    state.store.persist(&info)?;

    let env = vec![
        ("VIBETUNNEL_SESSION_ID".to_owned(), id.clone()),
        ("VIBETUNNEL_TITLE_MODE".to_owned(), params.title_mode.as_str().to_owned()),
    ];
    let host = match PtyHost::spawn(
        &params.command,
        &working_dir,
        params.cols,
        params.rows,
        &state.config.term,
        &env,
    ) {
        Ok(host) => host,
        Err(e) => {
            // Keep the record consistent: a failed spawn is an exited session.
            let _ = state.store.mark_exited(&id, 1);
            return Err(e).context("pty spawn failed");
        }
    };
    info.pid = Some(host.child_pid());
    info.status = SessionStatus::Running;
    state.store.persist(&info)?;

    let mut header = AsciinemaHeader::new(params.cols, params.rows);
    header.command = Some(params.command.join(" "));
    header.title = Some(name);
    header.env = Some(HashMap::from([("TERM".to_owned(), state.config.term.clone())]));
    let stdout_path = dir.join("stdout");
    let writer = AsciinemaWriter::create(&stdout_path, &header)?;

    let cancel = state.shutdown.child_token();
    let watcher = StreamWatcher::new(stdout_path);
    let term = TerminalFeed::new(params.cols, params.rows);
    let (pty, cmd_rx) = PtyCommander::channel();

    spawn_feed(
        id.clone(),
        Arc::clone(&term),
        Arc::clone(&watcher),
        Arc::clone(&state.flow),
        state.events.clone(),
        params.title_mode,
        cancel.clone(),
    );

    let handle = Arc::new(SessionHandle {
        id: id.clone(),
        dir,
        pty,
        term,
        watcher,
        title_mode: params.title_mode,
        cancel: cancel.clone(),
    });

    ipc::spawn_server(Arc::clone(state), Arc::clone(&handle))?;

    state.store.register(Arc::clone(&handle)).await;
    state.events.emit_global(ServerEvent::SessionStart { session_id: id.clone() });

    spawn_run_task(Arc::clone(state), handle, writer, cmd_rx, host);

    Ok(info)
}

/// Drive the PTY loop and handle teardown when the child exits.
fn spawn_run_task(
    state: Arc<AppState>,
    handle: Arc<SessionHandle>,
    writer: AsciinemaWriter,
    cmd_rx: tokio::sync::mpsc::Receiver<crate::pty::PtyCommand>,
    host: PtyHost,
) {
    tokio::spawn(async move {
        let id = handle.id.clone();
        let exit_code = match host.run(&id, writer, cmd_rx, handle.cancel.clone()).await {
            Ok(outcome) => outcome.code,
            Err(e) => {
                tracing::error!(session_id = %id, err = %e, "session stream failed");
                1
            }
        };

        if let Err(e) = state.store.mark_exited(&id, exit_code) {
            tracing::warn!(session_id = %id, err = %e, "failed to persist exit");
        }

        state.events.emit_session(&id, ServerEvent::Exit { exit_code });
        state
            .events
            .emit_global(ServerEvent::SessionExit { session_id: id.clone(), exit_code });

        // The IPC socket dies with the session; the control dir stays.
        let _ = std::fs::remove_file(handle.ipc_path());

        state.store.unregister(&id).await;
        handle.cancel.cancel();
        tracing::info!(session_id = %id, exit_code, "session exited");
    });
}
