// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::ws_bridge::WsBridge;

/// A registered peer server.
pub struct Remote {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Bearer token the HQ presents to this peer.
    pub token: String,
    pub live_sessions: RwLock<HashSet<String>>,
    /// One WS bridge per proxied session, shared by all local subscribers.
    pub bridges: RwLock<HashMap<String, Arc<WsBridge>>>,
    pub cancel: CancellationToken,
}

/// Wire form of a remote in API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInfo {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Registry of peers plus the session → remote index.
///
/// Invariant: a live session id maps to at most one remote.
pub struct RemoteRegistry {
    remotes: RwLock<HashMap<String, Arc<Remote>>>,
    by_session: RwLock<HashMap<String, String>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self { remotes: RwLock::new(HashMap::new()), by_session: RwLock::new(HashMap::new()) }
    }

    /// Register (or replace) a peer by name. Returns the new entry.
    pub async fn register(
        &self,
        id: String,
        name: String,
        url: String,
        token: String,
    ) -> Arc<Remote> {
        let remote = Arc::new(Remote {
            id,
            name: name.clone(),
            url: url.trim_end_matches('/').to_owned(),
            token,
            live_sessions: RwLock::new(HashSet::new()),
            bridges: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        });
        let old = self.remotes.write().await.insert(name.clone(), Arc::clone(&remote));
        if let Some(old) = old {
            old.cancel.cancel();
            self.drop_sessions_of(&old.name).await;
            tracing::info!(remote = %name, "replaced existing remote registration");
        }
        remote
    }

    /// Remove a peer and unindex its sessions.
    pub async fn unregister(&self, name: &str) -> Option<Arc<Remote>> {
        let removed = self.remotes.write().await.remove(name);
        if let Some(ref remote) = removed {
            remote.cancel.cancel();
            self.drop_sessions_of(name).await;
        }
        removed
    }

    async fn drop_sessions_of(&self, name: &str) {
        self.by_session.write().await.retain(|_, remote_name| remote_name != name);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Remote>> {
        self.remotes.read().await.get(name).map(Arc::clone)
    }

    pub async fn list(&self) -> Vec<Arc<Remote>> {
        self.remotes.read().await.values().map(Arc::clone).collect()
    }

    /// Look up the remote owning a session id.
    pub async fn find_by_session(&self, session_id: &str) -> Option<Arc<Remote>> {
        let name = self.by_session.read().await.get(session_id)?.clone();
        self.get(&name).await
    }

    /// Refresh the session index for one remote from its latest listing.
    /// A session reported by two peers belongs to the most recent reporter.
    pub async fn record_sessions(&self, remote: &Arc<Remote>, session_ids: Vec<String>) {
        {
            let mut live = remote.live_sessions.write().await;
            live.clear();
            live.extend(session_ids.iter().cloned());
        }
        let mut displaced: Vec<(String, String)> = Vec::new();
        {
            let mut index = self.by_session.write().await;
            index.retain(|_, name| name != &remote.name);
            for id in session_ids {
                if let Some(old) = index.insert(id.clone(), remote.name.clone()) {
                    if old != remote.name {
                        displaced.push((old, id));
                    }
                }
            }
        }
        for (old_name, session_id) in displaced {
            if let Some(old_remote) = self.get(&old_name).await {
                old_remote.live_sessions.write().await.remove(&session_id);
            }
        }
    }

    /// Drop one session from the index (e.g. after the peer returned 404).
    pub async fn unindex_session(&self, session_id: &str) {
        self.by_session.write().await.remove(session_id);
        for remote in self.list().await {
            remote.live_sessions.write().await.remove(session_id);
        }
    }
}

impl Default for RemoteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
