// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VibeTunnel core: PTY sessions exposed over HTTP, SSE, and a multiplexed
//! binary WebSocket, with optional HQ federation across peer servers.

pub mod asciinema;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod hq;
pub mod ipc;
pub mod pty;
pub mod session;
pub mod state;
pub mod stream;
pub mod term;
pub mod transport;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState::new(config, shutdown.clone())?);

    flow::spawn_scanner(Arc::clone(&state));

    // Peer mode: announce ourselves to the HQ and keep the registration alive.
    if state.config.hq_url.is_some() {
        hq::announce::spawn_announcer(Arc::clone(&state));
    }

    // Ctrl-C / SIGTERM triggers a graceful drain.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        signal_shutdown.cancel();
    });

    let mode = if state.config.hq { " (HQ mode)" } else { "" };
    tracing::info!("vibetunnel listening on {addr}{mode}");

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await.context("bind listener")?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Tear down live sessions: flush writers, emit exit events, close sockets.
    state.store.shutdown_all().await;

    Ok(())
}
