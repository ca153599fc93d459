// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary frame codec for the unified multiplex WebSocket (protocol v3).
//!
//! Layout (little-endian):
//!
//! ```text
//! u16  magic        = 0x5654 ("VT")
//! u8   version      = 3
//! u8   type
//! u32  sessionIdLen
//! u8[] sessionId    (UTF-8; empty = global channel)
//! u32  payloadLen
//! u8[] payload
//! ```

use std::fmt;

/// Frame magic, "VT" as a little-endian u16.
pub const MAGIC: u16 = 0x5654;

/// Current protocol version.
pub const VERSION: u8 = 3;

/// Fixed header bytes before the session id.
const HEADER_LEN: usize = 8;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    // server -> client
    Welcome = 2,
    Stdout = 20,
    SnapshotVt = 21,
    Event = 22,
    Error = 23,
    Pong = 41,
    // client -> server
    Subscribe = 10,
    Unsubscribe = 11,
    InputText = 30,
    InputKey = 31,
    Resize = 32,
    Kill = 33,
    ResetSize = 34,
    Ping = 40,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            2 => Some(Self::Welcome),
            10 => Some(Self::Subscribe),
            11 => Some(Self::Unsubscribe),
            20 => Some(Self::Stdout),
            21 => Some(Self::SnapshotVt),
            22 => Some(Self::Event),
            23 => Some(Self::Error),
            30 => Some(Self::InputText),
            31 => Some(Self::InputKey),
            32 => Some(Self::Resize),
            33 => Some(Self::Kill),
            34 => Some(Self::ResetSize),
            40 => Some(Self::Ping),
            41 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// A decoded multiplex frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Target session; empty string addresses the global channel.
    pub session_id: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, session_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { frame_type, session_id: session_id.into(), payload }
    }

    /// A frame addressed to the global channel with no payload.
    pub fn bare(frame_type: FrameType) -> Self {
        Self { frame_type, session_id: String::new(), payload: Vec::new() }
    }
}

/// Frame decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    BadMagic(u16),
    BadVersion(u8),
    UnknownType(u8),
    Truncated,
    /// Session id bytes were not valid UTF-8.
    BadSessionId,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(m) => write!(f, "bad frame magic 0x{m:04x}"),
            Self::BadVersion(v) => write!(f, "unsupported frame version {v}"),
            Self::UnknownType(t) => write!(f, "unknown frame type {t}"),
            Self::Truncated => f.write_str("truncated frame"),
            Self::BadSessionId => f.write_str("session id is not valid UTF-8"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode a frame into a byte vector.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let sid = frame.session_id.as_bytes();
    let mut out = Vec::with_capacity(HEADER_LEN + sid.len() + 4 + frame.payload.len());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(VERSION);
    out.push(frame.frame_type as u8);
    out.extend_from_slice(&(sid.len() as u32).to_le_bytes());
    out.extend_from_slice(sid);
    out.extend_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&frame.payload);
    out
}

/// Decode a frame from a byte slice.
///
/// Magic and version are validated before anything else is touched, so a
/// frame from a foreign protocol is rejected without reading its payload.
pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    if data.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let magic = u16::from_le_bytes([data[0], data[1]]);
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }
    if data[2] != VERSION {
        return Err(FrameError::BadVersion(data[2]));
    }
    let frame_type = FrameType::from_u8(data[3]).ok_or(FrameError::UnknownType(data[3]))?;

    if data.len() < HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    let sid_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let sid_end = HEADER_LEN.checked_add(sid_len).ok_or(FrameError::Truncated)?;
    if data.len() < sid_end + 4 {
        return Err(FrameError::Truncated);
    }
    let session_id = std::str::from_utf8(&data[HEADER_LEN..sid_end])
        .map_err(|_| FrameError::BadSessionId)?
        .to_owned();

    let plen = u32::from_le_bytes([
        data[sid_end],
        data[sid_end + 1],
        data[sid_end + 2],
        data[sid_end + 3],
    ]) as usize;
    let pstart = sid_end + 4;
    let pend = pstart.checked_add(plen).ok_or(FrameError::Truncated)?;
    if data.len() < pend {
        return Err(FrameError::Truncated);
    }

    Ok(Frame { frame_type, session_id, payload: data[pstart..pend].to_vec() })
}

// -- SUBSCRIBE payload --------------------------------------------------------

/// Subscription flag: raw stdout bytes.
pub const SUB_STDOUT: u32 = 1;
/// Subscription flag: binary terminal snapshots.
pub const SUB_SNAPSHOTS: u32 = 2;
/// Subscription flag: JSON session events.
pub const SUB_EVENTS: u32 = 4;

/// Bounds applied to the snapshot coalescing window.
pub const SNAP_WINDOW_MIN_MS: u32 = 16;
pub const SNAP_WINDOW_MAX_MS: u32 = 5000;

/// Decoded SUBSCRIBE payload: flags plus the snapshot coalescing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribePayload {
    pub flags: u32,
    pub snap_min_ms: u32,
    pub snap_max_ms: u32,
}

impl SubscribePayload {
    pub fn stdout(&self) -> bool {
        self.flags & SUB_STDOUT != 0
    }

    pub fn snapshots(&self) -> bool {
        self.flags & SUB_SNAPSHOTS != 0
    }

    pub fn events(&self) -> bool {
        self.flags & SUB_EVENTS != 0
    }

    /// Parse from a frame payload, clamping the window to [16, 5000] ms and
    /// fixing an inverted min/max pair.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 12 {
            return None;
        }
        let flags = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let min = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]])
            .clamp(SNAP_WINDOW_MIN_MS, SNAP_WINDOW_MAX_MS);
        let max = u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]])
            .clamp(SNAP_WINDOW_MIN_MS, SNAP_WINDOW_MAX_MS);
        Some(Self { flags, snap_min_ms: min.min(max), snap_max_ms: max.max(min) })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.snap_min_ms.to_le_bytes());
        out.extend_from_slice(&self.snap_max_ms.to_le_bytes());
        out
    }
}

// -- RESIZE payload -----------------------------------------------------------

/// Parse a RESIZE payload (`u32 cols | u32 rows`).
pub fn parse_resize(payload: &[u8]) -> Option<(u32, u32)> {
    if payload.len() < 8 {
        return None;
    }
    let cols = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let rows = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Some((cols, rows))
}

/// Encode a RESIZE payload.
pub fn encode_resize(cols: u32, rows: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&cols.to_le_bytes());
    out.extend_from_slice(&rows.to_le_bytes());
    out
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
