// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;

use super::{SessionHandle, SessionInfo, SessionStatus, MAX_NAME_LEN};

/// Control-directory store plus the registry of live session handles.
///
/// Exactly one store owns a control root; `session.json` writes go through
/// temp-file + rename so readers never observe a torn file.
pub struct SessionStore {
    root: PathBuf,
    live: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionStore {
    pub fn new(root: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create control dir {}", root.display()))?;
        Ok(Self { root, live: RwLock::new(HashMap::new()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Allocate a fresh session id and create its control directory.
    pub fn allocate(&self) -> anyhow::Result<(String, PathBuf)> {
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.session_dir(&id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create session dir {}", dir.display()))?;
        Ok((id, dir))
    }

    /// Atomically write `session.json` for the given record.
    pub fn persist(&self, info: &SessionInfo) -> anyhow::Result<()> {
        let dir = self.session_dir(&info.id);
        let json = serde_json::to_vec_pretty(info).context("serialize session.json")?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).context("create session.json temp file")?;
        tmp.write_all(&json).context("write session.json")?;
        tmp.persist(dir.join("session.json")).context("rename session.json")?;
        Ok(())
    }

    /// Load one session record from disk.
    pub fn load(&self, id: &str) -> Option<SessionInfo> {
        let path = self.session_dir(id).join("session.json");
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// List every session on disk, including ones created by an external
    /// tool writing the same layout. Unparseable entries are skipped.
    pub fn list(&self) -> Vec<SessionInfo> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return vec![];
        };
        let mut sessions: Vec<SessionInfo> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let contents = std::fs::read_to_string(e.path().join("session.json")).ok()?;
                serde_json::from_str(&contents).ok()
            })
            .collect();
        // RFC3339 timestamps order lexicographically.
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    /// Pick a name unique among live sessions by suffixing `-2`, `-3`, …
    pub async fn unique_name(&self, desired: &str) -> String {
        let live_names = self.live_names().await;
        if !live_names.contains(&desired.to_owned()) {
            return desired.to_owned();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{desired}-{n}");
            if !live_names.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    async fn live_names(&self) -> Vec<String> {
        let live = self.live.read().await;
        live.keys().filter_map(|id| self.load(id)).map(|info| info.name).collect()
    }

    /// Rename a session, disambiguating against other live sessions.
    /// Returns the final (possibly suffixed) name.
    pub async fn update_name(&self, id: &str, name: &str) -> anyhow::Result<String> {
        if name.len() > MAX_NAME_LEN {
            anyhow::bail!("name exceeds {MAX_NAME_LEN} bytes");
        }
        let mut info = self.load(id).context("session not found")?;
        let taken: Vec<String> = {
            let live = self.live.read().await;
            live.keys()
                .filter(|k| k.as_str() != id)
                .filter_map(|k| self.load(k))
                .map(|i| i.name)
                .collect()
        };
        let mut final_name = name.to_owned();
        let mut n = 2;
        while taken.contains(&final_name) {
            final_name = format!("{name}-{n}");
            n += 1;
        }
        info.name = final_name.clone();
        self.persist(&info)?;
        Ok(final_name)
    }

    /// Flip a session to `exited` with the given code.
    pub fn mark_exited(&self, id: &str, exit_code: i32) -> anyhow::Result<()> {
        let mut info = self.load(id).context("session not found")?;
        info.status = SessionStatus::Exited;
        info.exit_code = Some(exit_code);
        info.pid = None;
        self.persist(&info)
    }

    /// Remove control directories of exited sessions. Idempotent; returns
    /// the cleaned session ids.
    pub fn cleanup_exited(&self) -> Vec<String> {
        let mut cleaned = Vec::new();
        for info in self.list() {
            if info.status == SessionStatus::Exited {
                if let Err(e) = self.remove_dir(&info.id) {
                    tracing::warn!(session_id = %info.id, err = %e, "cleanup failed");
                } else {
                    cleaned.push(info.id);
                }
            }
        }
        cleaned
    }

    /// Delete one session's control directory.
    pub fn remove_dir(&self, id: &str) -> anyhow::Result<()> {
        let dir = self.session_dir(id);
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("remove session dir {}", dir.display()))
    }

    // -- Live handle registry -------------------------------------------------

    pub async fn register(&self, handle: Arc<SessionHandle>) {
        self.live.write().await.insert(handle.id.clone(), handle);
    }

    pub async fn unregister(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.live.write().await.remove(id)
    }

    pub async fn get_live(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.live.read().await.get(id).map(Arc::clone)
    }

    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }

    /// Kill every live session and cancel its tasks (shutdown path).
    pub async fn shutdown_all(&self) {
        let handles: Vec<Arc<SessionHandle>> =
            self.live.read().await.values().map(Arc::clone).collect();
        for handle in handles {
            let _ = handle.pty.kill(nix::sys::signal::Signal::SIGTERM).await;
            handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
