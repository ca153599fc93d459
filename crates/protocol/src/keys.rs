// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-token to byte-sequence mapping for `INPUT_KEY` frames.

/// Resolve a key token (e.g. `enter`, `ctrl+c`, `arrow_up`, `f5`) to the
/// byte sequence written to the PTY. Returns `None` for unknown tokens.
pub fn key_sequence(token: &str) -> Option<Vec<u8>> {
    let bytes: &[u8] = match token {
        "enter" => b"\r",
        "tab" => b"\t",
        "escape" => b"\x1b",
        "space" => b" ",
        "backspace" => b"\x7f",
        "delete" => b"\x1b[3~",
        "arrow_up" => b"\x1b[A",
        "arrow_down" => b"\x1b[B",
        "arrow_right" => b"\x1b[C",
        "arrow_left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "page_up" => b"\x1b[5~",
        "page_down" => b"\x1b[6~",
        "f1" => b"\x1bOP",
        "f2" => b"\x1bOQ",
        "f3" => b"\x1bOR",
        "f4" => b"\x1bOS",
        "f5" => b"\x1b[15~",
        "f6" => b"\x1b[17~",
        "f7" => b"\x1b[18~",
        "f8" => b"\x1b[19~",
        "f9" => b"\x1b[20~",
        "f10" => b"\x1b[21~",
        "f11" => b"\x1b[23~",
        "f12" => b"\x1b[24~",
        _ => {
            // ctrl+a .. ctrl+z map to control bytes 0x01..0x1a.
            let letter = token.strip_prefix("ctrl+")?;
            let mut chars = letter.chars();
            let c = chars.next()?;
            if chars.next().is_some() || !c.is_ascii_lowercase() {
                return None;
            }
            return Some(vec![c as u8 - b'a' + 1]);
        }
    };
    Some(bytes.to_vec())
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
