// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal snapshot model and its compact binary codec.
//!
//! A snapshot is the visible cell grid of the emulator, trimmed of trailing
//! blank rows and trailing blank cells per row. The binary form is a fixed
//! 32-byte little-endian header followed by row records:
//!
//! ```text
//! 0xFE <u8 count>      count consecutive fully blank rows
//! 0xFD <u16 cellCount> row with cellCount cells
//! ```
//!
//! Cell type byte: bit7 extended data follows, bit6 unicode char, bit5 has
//! foreground, bit4 has background, bit3 fg is RGB, bit2 bg is RGB, bits 1-0
//! char type (0 = space, 1 = ASCII, 2 = unicode). A plain unstyled space is
//! the single byte 0x00.

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

/// Snapshot magic, "VT" little-endian.
pub const MAGIC: u16 = 0x5654;

/// Snapshot codec version.
pub const VERSION: u8 = 1;

/// Header flag bit: a BEL was seen since the previous snapshot.
pub const FLAG_BELL: u8 = 0x01;

const HEADER_LEN: usize = 32;
const ROW_BLANK: u8 = 0xFE;
const ROW_CELLS: u8 = 0xFD;

const EXT: u8 = 0x80;
const UNICODE: u8 = 0x40;
const HAS_FG: u8 = 0x20;
const HAS_BG: u8 = 0x10;
const FG_RGB: u8 = 0x08;
const BG_RGB: u8 = 0x04;
const CHAR_SPACE: u8 = 0;
const CHAR_ASCII: u8 = 1;
const CHAR_UNICODE: u8 = 2;

/// Upper bound accepted for either grid dimension.
pub const MAX_DIM: u32 = 1000;

// Attribute bits carried in the extended-data byte.
pub const ATTR_BOLD: u8 = 0x01;
pub const ATTR_FAINT: u8 = 0x02;
pub const ATTR_ITALIC: u8 = 0x04;
pub const ATTR_UNDERLINE: u8 = 0x08;
pub const ATTR_INVERSE: u8 = 0x10;
pub const ATTR_HIDDEN: u8 = 0x20;
pub const ATTR_STRIKETHROUGH: u8 = 0x40;

/// A cell color: 8-bit palette index or 24-bit RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellColor {
    Palette(u8),
    Rgb(u8, u8, u8),
}

/// One terminal cell: a grapheme plus optional colors and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub ch: String,
    /// Display width: 0 (combining/ZWJ), 1, or 2 (wide/emoji).
    pub width: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fg: Option<CellColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg: Option<CellColor>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attrs: u8,
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

impl Cell {
    /// An unstyled cell for the given char.
    pub fn plain(ch: char) -> Self {
        Self { ch: ch.to_string(), width: char_display_width(ch), fg: None, bg: None, attrs: 0 }
    }

    /// Whether this cell is an unstyled single-width space.
    pub fn is_blank(&self) -> bool {
        self.ch == " " && self.fg.is_none() && self.bg.is_none() && self.attrs == 0
    }
}

/// A snapshot row; an empty cell list means a fully blank row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub cells: Vec<Cell>,
}

impl SnapshotRow {
    pub fn is_blank(&self) -> bool {
        self.cells.is_empty()
    }
}

/// The visible viewport of a terminal emulator at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub cols: u32,
    pub rows: u32,
    pub viewport_y: i32,
    pub cursor_x: i32,
    pub cursor_y: i32,
    pub bell: bool,
    /// Trimmed rows; rows beyond the last entry are blank.
    pub grid: Vec<SnapshotRow>,
}

/// Display width of a char per East-Asian-Width rules: emoji are wide,
/// variation selectors and zero-width joiners are 0.
pub fn char_display_width(ch: char) -> u8 {
    match ch.width() {
        Some(w) => w.min(2) as u8,
        // Control chars report None; they never land in a snapshot cell.
        None => 0,
    }
}

/// Snapshot decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    BadMagic(u16),
    BadVersion(u8),
    BadDimensions { cols: u32, rows: u32 },
    CellCountOverflow { count: u16, cols: u32 },
    Truncated,
    BadChar,
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadMagic(m) => write!(f, "bad snapshot magic 0x{m:04x}"),
            Self::BadVersion(v) => write!(f, "unsupported snapshot version {v}"),
            Self::BadDimensions { cols, rows } => {
                write!(f, "dimensions out of range: {cols}x{rows}")
            }
            Self::CellCountOverflow { count, cols } => {
                write!(f, "row cell count {count} exceeds 2x{cols} columns")
            }
            Self::Truncated => f.write_str("truncated snapshot"),
            Self::BadChar => f.write_str("invalid cell character"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Encode a snapshot into its binary form.
pub fn encode(snap: &BufferSnapshot) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + snap.grid.len() * 8);

    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(VERSION);
    out.push(if snap.bell { FLAG_BELL } else { 0 });
    out.extend_from_slice(&snap.cols.to_le_bytes());
    out.extend_from_slice(&snap.rows.to_le_bytes());
    out.extend_from_slice(&snap.viewport_y.to_le_bytes());
    out.extend_from_slice(&snap.cursor_x.to_le_bytes());
    out.extend_from_slice(&snap.cursor_y.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let mut blank_run = 0u32;
    for row in &snap.grid {
        if row.is_blank() {
            blank_run += 1;
            continue;
        }
        flush_blank_run(&mut out, &mut blank_run);
        out.push(ROW_CELLS);
        out.extend_from_slice(&(row.cells.len() as u16).to_le_bytes());
        for cell in &row.cells {
            encode_cell(&mut out, cell);
        }
    }
    flush_blank_run(&mut out, &mut blank_run);

    out
}

fn flush_blank_run(out: &mut Vec<u8>, run: &mut u32) {
    while *run > 0 {
        let n = (*run).min(255) as u8;
        out.push(ROW_BLANK);
        out.push(n);
        *run -= n as u32;
    }
}

fn encode_cell(out: &mut Vec<u8>, cell: &Cell) {
    if cell.is_blank() {
        out.push(0x00);
        return;
    }

    let mut type_byte = 0u8;
    let has_ext = cell.attrs != 0 || cell.fg.is_some() || cell.bg.is_some();
    if has_ext {
        type_byte |= EXT;
    }

    let ascii = cell.ch.len() == 1 && cell.ch.as_bytes()[0] < 0x80;
    let char_type = if cell.ch == " " {
        CHAR_SPACE
    } else if ascii {
        CHAR_ASCII
    } else {
        type_byte |= UNICODE;
        CHAR_UNICODE
    };
    type_byte |= char_type;

    if cell.fg.is_some() {
        type_byte |= HAS_FG;
    }
    if cell.bg.is_some() {
        type_byte |= HAS_BG;
    }
    if matches!(cell.fg, Some(CellColor::Rgb(..))) {
        type_byte |= FG_RGB;
    }
    if matches!(cell.bg, Some(CellColor::Rgb(..))) {
        type_byte |= BG_RGB;
    }
    out.push(type_byte);

    match char_type {
        CHAR_ASCII => out.push(cell.ch.as_bytes()[0]),
        CHAR_UNICODE => {
            let bytes = cell.ch.as_bytes();
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
        _ => {}
    }

    if has_ext {
        out.push(cell.attrs);
        if let Some(color) = cell.fg {
            encode_color(out, color);
        }
        if let Some(color) = cell.bg {
            encode_color(out, color);
        }
    }
}

fn encode_color(out: &mut Vec<u8>, color: CellColor) {
    match color {
        CellColor::Palette(idx) => out.push(idx),
        CellColor::Rgb(r, g, b) => out.extend_from_slice(&[r, g, b]),
    }
}

/// Decode a binary snapshot.
///
/// Magic, version, and dimensions are validated; a cursor outside the grid
/// is tolerated with a warning since resize races make it transient.
pub fn decode(data: &[u8]) -> Result<BufferSnapshot, SnapshotError> {
    if data.len() < HEADER_LEN {
        return Err(SnapshotError::Truncated);
    }
    let magic = u16::from_le_bytes([data[0], data[1]]);
    if magic != MAGIC {
        return Err(SnapshotError::BadMagic(magic));
    }
    if data[2] != VERSION {
        return Err(SnapshotError::BadVersion(data[2]));
    }
    let bell = data[3] & FLAG_BELL != 0;
    let cols = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let rows = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if cols == 0 || rows == 0 || cols > MAX_DIM || rows > MAX_DIM {
        return Err(SnapshotError::BadDimensions { cols, rows });
    }
    let viewport_y = i32::from_le_bytes([data[12], data[13], data[14], data[15]]);
    let cursor_x = i32::from_le_bytes([data[16], data[17], data[18], data[19]]);
    let cursor_y = i32::from_le_bytes([data[20], data[21], data[22], data[23]]);

    if cursor_x < 0 || cursor_y < 0 || cursor_x as u32 >= cols || cursor_y as u32 >= rows {
        tracing::warn!(cursor_x, cursor_y, cols, rows, "snapshot cursor outside grid");
    }

    let mut grid = Vec::new();
    let mut pos = HEADER_LEN;
    while pos < data.len() {
        match data[pos] {
            ROW_BLANK => {
                if pos + 2 > data.len() {
                    return Err(SnapshotError::Truncated);
                }
                let count = data[pos + 1];
                for _ in 0..count {
                    grid.push(SnapshotRow::default());
                }
                pos += 2;
            }
            ROW_CELLS => {
                if pos + 3 > data.len() {
                    return Err(SnapshotError::Truncated);
                }
                let count = u16::from_le_bytes([data[pos + 1], data[pos + 2]]);
                if count as u32 > 2 * cols {
                    return Err(SnapshotError::CellCountOverflow { count, cols });
                }
                pos += 3;
                let mut cells = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (cell, next) = decode_cell(data, pos)?;
                    cells.push(cell);
                    pos = next;
                }
                grid.push(SnapshotRow { cells });
            }
            other => {
                tracing::warn!(record = other, "unknown snapshot row record");
                return Err(SnapshotError::Truncated);
            }
        }
    }

    Ok(BufferSnapshot { cols, rows, viewport_y, cursor_x, cursor_y, bell, grid })
}

fn decode_cell(data: &[u8], mut pos: usize) -> Result<(Cell, usize), SnapshotError> {
    let type_byte = *data.get(pos).ok_or(SnapshotError::Truncated)?;
    pos += 1;

    let ch: String = match type_byte & 0x03 {
        CHAR_SPACE => " ".to_owned(),
        CHAR_ASCII => {
            let b = *data.get(pos).ok_or(SnapshotError::Truncated)?;
            pos += 1;
            (b as char).to_string()
        }
        CHAR_UNICODE => {
            let len = *data.get(pos).ok_or(SnapshotError::Truncated)? as usize;
            pos += 1;
            let end = pos.checked_add(len).ok_or(SnapshotError::Truncated)?;
            let bytes = data.get(pos..end).ok_or(SnapshotError::Truncated)?;
            pos = end;
            std::str::from_utf8(bytes).map_err(|_| SnapshotError::BadChar)?.to_owned()
        }
        _ => return Err(SnapshotError::BadChar),
    };

    let mut attrs = 0u8;
    let mut fg = None;
    let mut bg = None;
    if type_byte & EXT != 0 {
        attrs = *data.get(pos).ok_or(SnapshotError::Truncated)?;
        pos += 1;
        if type_byte & HAS_FG != 0 {
            let (color, next) = decode_color(data, pos, type_byte & FG_RGB != 0)?;
            fg = Some(color);
            pos = next;
        }
        if type_byte & HAS_BG != 0 {
            let (color, next) = decode_color(data, pos, type_byte & BG_RGB != 0)?;
            bg = Some(color);
            pos = next;
        }
    }

    let width = ch.chars().map(char_display_width).max().unwrap_or(1);
    Ok((Cell { ch, width, fg, bg, attrs }, pos))
}

fn decode_color(data: &[u8], pos: usize, rgb: bool) -> Result<(CellColor, usize), SnapshotError> {
    if rgb {
        let bytes = data.get(pos..pos + 3).ok_or(SnapshotError::Truncated)?;
        Ok((CellColor::Rgb(bytes[0], bytes[1], bytes[2]), pos + 3))
    } else {
        let idx = *data.get(pos).ok_or(SnapshotError::Truncated)?;
        Ok((CellColor::Palette(idx), pos + 1))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
