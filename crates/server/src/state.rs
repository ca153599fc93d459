// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::flow::FlowController;
use crate::hq::RemoteRegistry;
use crate::session::SessionStore;
use crate::transport::auth::AuthKeys;

/// Process-wide state: constructed at boot, torn down on signal. Tests
/// instantiate a fresh value per case.
pub struct AppState {
    pub config: ServerConfig,
    pub store: SessionStore,
    pub remotes: RemoteRegistry,
    pub events: EventBus,
    pub flow: Arc<FlowController>,
    pub auth: AuthKeys,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let store = SessionStore::new(config.control_root())?;
        let auth = AuthKeys::from_env(config.no_auth)?;
        Ok(Self {
            config,
            store,
            remotes: RemoteRegistry::new(),
            events: EventBus::new(),
            flow: Arc::new(FlowController::new()),
            auth,
            shutdown,
            started_at: Instant::now(),
        })
    }
}
