// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire formats shared by the VibeTunnel server and its clients.
//!
//! Everything here is pure and stateless: the v3 multiplex WebSocket frame
//! codec, the binary terminal-snapshot codec, and the key-token table used
//! by `INPUT_KEY` frames.

pub mod frame;
pub mod keys;
pub mod snapshot;
