// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Headless terminal emulation backed by an avt virtual terminal.

mod emulator;
mod feed;

pub use emulator::{strip_title_sequences, Emulator, SCROLLBACK_LIMIT};
pub use feed::{spawn_feed, TerminalFeed};
