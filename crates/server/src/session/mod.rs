// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session model: on-disk `session.json`, the control-dir layout, and the
//! in-memory handle for a live session.

mod launch;
mod store;

pub use launch::create_session;
pub use store::SessionStore;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::pty::PtyCommander;
use crate::stream::StreamWatcher;
use crate::term::TerminalFeed;

/// Longest accepted session name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Session lifecycle state persisted in `session.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Exited,
}

/// How OSC title sequences in session output are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TitleMode {
    #[default]
    None,
    /// Strip title sequences from the emulator feed.
    Filter,
    /// Title changes only via explicit update requests.
    Static,
    /// Alias of `static`.
    Dynamic,
}

impl TitleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Filter => "filter",
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }
}

/// Persistent session record (`session.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// RFC3339 timestamp.
    pub started_at: String,
    pub initial_cols: u16,
    pub initial_rows: u16,
    #[serde(default)]
    pub title_mode: TitleMode,
    pub term: String,
    #[serde(default = "default_spawn_type")]
    pub spawn_type: String,
}

fn default_spawn_type() -> String {
    "pty".to_owned()
}

/// Current time in the on-disk timestamp format.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parameters for creating a session.
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub title_mode: TitleMode,
}

/// In-memory handle for a live session. Components hold session IDs, never
/// owning references to each other; this is the one composition point.
pub struct SessionHandle {
    pub id: String,
    pub dir: PathBuf,
    pub pty: PtyCommander,
    pub term: Arc<TerminalFeed>,
    pub watcher: Arc<StreamWatcher>,
    pub title_mode: TitleMode,
    /// Cancelling tears down the feed, IPC server, and PTY task.
    pub cancel: CancellationToken,
}

impl SessionHandle {
    pub fn stdout_path(&self) -> PathBuf {
        self.dir.join("stdout")
    }

    pub fn ipc_path(&self) -> PathBuf {
        self.dir.join("ipc.sock")
    }
}
