// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session IPC over a Unix domain socket.
//!
//! Framing: `type:u8, len:u32 (big-endian), payload[len]`. Partial frames
//! are buffered across reads. A malformed frame closes the offending client
//! but never the session.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::pty::{parse_signal, PtyCommand};
use crate::session::SessionHandle;
use crate::state::AppState;

/// Raw bytes destined for the PTY.
pub const FRAME_STDIN: u8 = 0x01;
/// UTF-8 JSON control command.
pub const FRAME_CONTROL: u8 = 0x02;
/// Reserved; consumed and ignored.
pub const FRAME_STATUS: u8 = 0x03;

/// Upper bound on a single frame payload.
const MAX_PAYLOAD: usize = 1 << 20;

/// Control commands carried in `FRAME_CONTROL` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ControlCommand {
    Resize { cols: u16, rows: u16 },
    Kill {
        #[serde(default)]
        signal: Option<String>,
    },
    ResetSize,
    UpdateTitle { name: String },
}

/// Incremental frame parser with partial-frame buffering.
#[derive(Default)]
pub struct FrameBuf {
    buf: Vec<u8>,
}

impl FrameBuf {
    /// Append bytes and pop every complete frame.
    ///
    /// Errors on an unknown type byte or oversized payload; the caller is
    /// expected to drop the client.
    pub fn push(&mut self, data: &[u8]) -> anyhow::Result<Vec<(u8, Vec<u8>)>> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < 5 {
                break;
            }
            let frame_type = self.buf[0];
            if !matches!(frame_type, FRAME_STDIN | FRAME_CONTROL | FRAME_STATUS) {
                anyhow::bail!("unknown ipc frame type {frame_type:#x}");
            }
            let len =
                u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
            if len > MAX_PAYLOAD {
                anyhow::bail!("ipc frame payload too large: {len}");
            }
            if self.buf.len() < 5 + len {
                break;
            }
            let payload = self.buf[5..5 + len].to_vec();
            self.buf.drain(..5 + len);
            frames.push((frame_type, payload));
        }
        Ok(frames)
    }
}

/// Encode one frame.
pub fn encode_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(frame_type);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Bind the session's `ipc.sock` and start the accept loop.
pub fn spawn_server(state: Arc<AppState>, handle: Arc<SessionHandle>) -> anyhow::Result<()> {
    let path = handle.ipc_path();
    // A stale socket from a crashed predecessor blocks bind.
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind ipc socket {}", path.display()))?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = handle.cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let state = Arc::clone(&state);
                            let handle = Arc::clone(&handle);
                            tokio::spawn(async move {
                                if let Err(e) = serve_client(state, handle, stream).await {
                                    tracing::debug!(err = %e, "ipc client closed");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(err = %e, "ipc accept failed");
                            break;
                        }
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&path);
    });
    Ok(())
}

/// Handle one IPC client until EOF, error, or session teardown.
async fn serve_client(
    state: Arc<AppState>,
    handle: Arc<SessionHandle>,
    mut stream: UnixStream,
) -> anyhow::Result<()> {
    let mut frames = FrameBuf::default();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = tokio::select! {
            _ = handle.cancel.cancelled() => return Ok(()),
            n = stream.read(&mut buf) => n.context("ipc read")?,
        };
        if n == 0 {
            return Ok(());
        }

        for (frame_type, payload) in frames.push(&buf[..n])? {
            match frame_type {
                FRAME_STDIN => {
                    handle.pty.write(Bytes::from(payload)).await;
                }
                FRAME_CONTROL => {
                    let cmd: ControlCommand =
                        serde_json::from_slice(&payload).context("parse control command")?;
                    if let Some(reply) = dispatch(&state, &handle, cmd).await? {
                        stream.write_all(&reply).await.context("ipc write")?;
                    }
                }
                FRAME_STATUS => {}
                _ => {}
            }
        }
    }
}

/// Execute a control command; `update-title` answers on the same socket.
async fn dispatch(
    state: &AppState,
    handle: &SessionHandle,
    cmd: ControlCommand,
) -> anyhow::Result<Option<Vec<u8>>> {
    match cmd {
        ControlCommand::Resize { cols, rows } => {
            handle.pty.resize(cols, rows).await;
            Ok(None)
        }
        ControlCommand::Kill { signal } => {
            let signal = parse_signal(signal.as_deref().unwrap_or(""))
                .context("unknown signal name")?;
            handle.pty.kill(signal).await;
            Ok(None)
        }
        ControlCommand::ResetSize => {
            handle.pty.send(PtyCommand::ResetSize).await;
            Ok(None)
        }
        ControlCommand::UpdateTitle { name } => {
            let final_name = state.store.update_name(&handle.id, &name).await?;
            let reply = serde_json::to_vec(&ControlCommand::UpdateTitle { name: final_name })?;
            Ok(Some(encode_frame(FRAME_CONTROL, &reply)))
        }
    }
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
