// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY spawning and the per-session read loop.

mod host;

pub use host::{parse_signal, ExitOutcome, PtyCommand, PtyCommander, PtyHost};
