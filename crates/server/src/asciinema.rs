// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only asciinema v2 stream writer.
//!
//! One JSON line per event: a header object first, then `[t, kind, data]`
//! tuples with `t` in seconds since the header, terminated by the synthetic
//! `["exit", code, sessionId]` tuple. The writer tracks the byte offset of
//! the last full-screen clear so replays can skip dead history.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Clear sequences that reset the visible screen. `ESC[H ESC[2J` is covered
/// by the `ESC[2J` substring.
const CLEAR_SEQUENCES: [&str; 2] = ["\x1b[2J", "\x1b[3J"];

/// Asciinema v2 header line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsciinemaHeader {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

impl AsciinemaHeader {
    pub fn new(width: u16, height: u16) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self { version: 2, width, height, timestamp, command: None, title: None, env: None }
    }
}

/// A parsed line of an asciinema stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Header { width: u16, height: u16 },
    Output { time: f64, data: String },
    Input { time: f64, data: String },
    Resize { time: f64, cols: u16, rows: u16 },
    Exit { code: i32, session_id: String },
}

/// Parse one stream line. Returns `None` for blank or malformed lines.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;

    if let Some(obj) = value.as_object() {
        let width = obj.get("width")?.as_u64()? as u16;
        let height = obj.get("height")?.as_u64()? as u16;
        return Some(StreamEvent::Header { width, height });
    }

    let arr = value.as_array()?;
    match arr.first()? {
        serde_json::Value::String(kind) if kind == "exit" => {
            let code = arr.get(1)?.as_i64()? as i32;
            let session_id = arr.get(2)?.as_str()?.to_owned();
            Some(StreamEvent::Exit { code, session_id })
        }
        serde_json::Value::Number(t) => {
            let time = t.as_f64()?;
            let kind = arr.get(1)?.as_str()?;
            let data = arr.get(2)?.as_str()?;
            match kind {
                "o" => Some(StreamEvent::Output { time, data: data.to_owned() }),
                "i" => Some(StreamEvent::Input { time, data: data.to_owned() }),
                "r" => {
                    let (cols, rows) = data.split_once('x')?;
                    Some(StreamEvent::Resize {
                        time,
                        cols: cols.parse().ok()?,
                        rows: rows.parse().ok()?,
                    })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whether output data contains a full-screen clear sequence.
pub fn contains_clear(data: &str) -> bool {
    CLEAR_SEQUENCES.iter().any(|seq| data.contains(seq))
}

/// Scan an existing stream file for the offset of the last line holding a
/// full-screen clear. Used when attaching to files written by another
/// process (the `fwd` layout).
pub fn scan_last_clear_offset(path: &Path) -> std::io::Result<u64> {
    let contents = std::fs::read_to_string(path)?;
    let mut offset = 0u64;
    let mut last_clear = 0u64;
    for line in contents.split_inclusive('\n') {
        if let Some(StreamEvent::Output { ref data, .. }) = parse_line(line) {
            if contains_clear(data) {
                last_clear = offset;
            }
        }
        offset += line.len() as u64;
    }
    Ok(last_clear)
}

/// Append-only writer for one session's `stdout` file.
pub struct AsciinemaWriter {
    file: File,
    start: Instant,
    offset: u64,
    last_clear_offset: u64,
}

impl AsciinemaWriter {
    /// Create the stream file and write the header line.
    pub fn create(path: &Path, header: &AsciinemaHeader) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open stream file {}", path.display()))?;
        let mut writer =
            Self { file, start: Instant::now(), offset: 0, last_clear_offset: 0 };
        let line = serde_json::to_string(header).context("serialize header")?;
        writer.write_line(&line)?;
        Ok(writer)
    }

    fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.file.write_all(line.as_bytes()).context("stream write failed")?;
        self.file.write_all(b"\n").context("stream write failed")?;
        self.file.flush().context("stream flush failed")?;
        self.offset += line.len() as u64 + 1;
        Ok(())
    }

    fn write_event(&mut self, kind: &str, data: &str) -> anyhow::Result<()> {
        let line = serde_json::to_string(&serde_json::json!([self.elapsed(), kind, data]))
            .context("serialize event")?;
        self.write_line(&line)
    }

    /// Append an output event. Raw bytes are recorded lossy-UTF-8; a clear
    /// sequence in the batch moves `last_clear_offset` to this line.
    pub fn write_output(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let text = String::from_utf8_lossy(data);
        if contains_clear(&text) {
            self.last_clear_offset = self.offset;
        }
        self.write_event("o", &text)
    }

    /// Append an input event.
    pub fn write_input(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.write_event("i", &String::from_utf8_lossy(data))
    }

    /// Append a resize event (`"COLSxROWS"`).
    pub fn write_resize(&mut self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.write_event("r", &format!("{cols}x{rows}"))
    }

    /// Append the synthetic terminator.
    pub fn write_exit(&mut self, code: i32, session_id: &str) -> anyhow::Result<()> {
        let line = serde_json::to_string(&serde_json::json!(["exit", code, session_id]))
            .context("serialize exit event")?;
        self.write_line(&line)
    }

    /// Total bytes written so far.
    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    /// Byte offset of the line containing the most recent full-screen clear.
    pub fn last_clear_offset(&self) -> u64 {
        self.last_clear_offset
    }
}

#[cfg(test)]
#[path = "asciinema_tests.rs"]
mod tests;
