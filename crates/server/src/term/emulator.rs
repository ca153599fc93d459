// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use vtproto::snapshot::{
    char_display_width, BufferSnapshot, Cell, CellColor, SnapshotRow, ATTR_BOLD, ATTR_FAINT,
    ATTR_INVERSE, ATTR_ITALIC, ATTR_STRIKETHROUGH, ATTR_UNDERLINE,
};

/// Maximum scrollback lines retained by the virtual terminal.
pub const SCROLLBACK_LIMIT: usize = 10_000;

/// Scrollback-erase sequence (`ESC[3J`); resets the scrollback estimate.
const ERASE_SCROLLBACK: &[u8] = b"\x1b[3J";

/// Headless VT wrapping `avt::Vt`.
pub struct Emulator {
    vt: avt::Vt,
    cols: u16,
    rows: u16,
    seq: u64,
    bell_pending: bool,
    /// Estimated lines pushed into scrollback, tracked from fed newlines
    /// since avt does not expose its scrollback length.
    scrollback_estimate: usize,
    viewport_filled: usize,
    /// Buffer for incomplete UTF-8 trailing bytes between `feed()` calls.
    utf8_buf: [u8; 3],
    utf8_buf_len: u8,
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Returns the number of trailing bytes that form an incomplete UTF-8 sequence.
///
/// Scans backwards from the end of `data` looking for a leading byte whose
/// expected sequence length exceeds the bytes available. Returns 0 when the
/// tail is complete (or pure ASCII).
fn incomplete_utf8_tail_len(data: &[u8]) -> usize {
    let len = data.len();
    for i in 1..=len.min(3) {
        let byte = data[len - i];
        if byte < 0x80 {
            return 0;
        }
        if byte >= 0xC0 {
            let expected = if byte < 0xE0 {
                2
            } else if byte < 0xF0 {
                3
            } else {
                4
            };
            return if i < expected { i } else { 0 };
        }
        // Continuation byte (0x80..0xBF) — keep scanning backwards.
    }
    0
}

/// Strip OSC 0/1/2 title sequences (`ESC ] 0;… BEL` or `ESC ] 0;… ESC \`)
/// from terminal output.
pub fn strip_title_sequences(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == 0x1b
            && i + 2 < data.len()
            && data[i + 1] == b']'
            && matches!(data[i + 2], b'0' | b'1' | b'2')
            && data.get(i + 3) == Some(&b';')
        {
            // Scan for the terminator: BEL or ST (ESC \).
            let mut j = i + 4;
            let mut end = None;
            while j < data.len() {
                match data[j] {
                    0x07 => {
                        end = Some(j + 1);
                        break;
                    }
                    0x1b if data.get(j + 1) == Some(&b'\\') => {
                        end = Some(j + 2);
                        break;
                    }
                    _ => j += 1,
                }
            }
            if let Some(end) = end {
                i = end;
                continue;
            }
        }
        out.push(data[i]);
        i += 1;
    }
    out
}

impl Emulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            vt: avt::Vt::builder()
                .size(cols as usize, rows as usize)
                .scrollback_limit(SCROLLBACK_LIMIT)
                .build(),
            cols,
            rows,
            seq: 0,
            bell_pending: false,
            scrollback_estimate: 0,
            viewport_filled: 0,
            utf8_buf: [0; 3],
            utf8_buf_len: 0,
        }
    }

    /// Feed raw output bytes. Returns true if a BEL was seen.
    pub fn feed(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        // Prepend any buffered incomplete UTF-8 bytes from the previous call.
        let buf_len = self.utf8_buf_len as usize;
        let owned: Vec<u8>;
        let input = if buf_len == 0 {
            data
        } else {
            owned = [&self.utf8_buf[..buf_len], data].concat();
            self.utf8_buf_len = 0;
            &owned
        };

        let bell = input.contains(&0x07);
        if bell {
            self.bell_pending = true;
        }

        if input.windows(ERASE_SCROLLBACK.len()).any(|w| w == ERASE_SCROLLBACK) {
            self.scrollback_estimate = 0;
        }
        for _ in input.iter().filter(|&&b| b == b'\n') {
            if self.viewport_filled + 1 >= self.rows as usize {
                self.scrollback_estimate = (self.scrollback_estimate + 1).min(SCROLLBACK_LIMIT);
            } else {
                self.viewport_filled += 1;
            }
        }

        // Split off any incomplete UTF-8 trailing bytes to buffer for next call.
        let tail = incomplete_utf8_tail_len(input);
        let (to_feed, to_buffer) = input.split_at(input.len() - tail);

        if !to_buffer.is_empty() {
            self.utf8_buf[..to_buffer.len()].copy_from_slice(to_buffer);
            self.utf8_buf_len = to_buffer.len() as u8;
        }

        if !to_feed.is_empty() {
            let s = String::from_utf8_lossy(to_feed);
            let _ = self.vt.feed_str(&s);
        }

        self.seq += 1;
        bell
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let _ = self.vt.resize(cols as usize, rows as usize);
        self.cols = cols;
        self.rows = rows;
        self.seq += 1;
    }

    /// Sequence number, incremented on each feed or resize.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn clear_bell(&mut self) {
        self.bell_pending = false;
    }

    /// Buffer pressure in `[0, ~1]`: `(scrollback + rows) / 10_000`.
    pub fn buffer_utilization(&self) -> f64 {
        (self.scrollback_estimate + self.rows as usize) as f64 / SCROLLBACK_LIMIT as f64
    }

    /// Capture the visible viewport as a snapshot, trimming trailing blank
    /// rows and trailing blank cells per row (at least one row remains).
    pub fn snapshot(&self) -> BufferSnapshot {
        let cursor = self.vt.cursor();
        let mut grid: Vec<SnapshotRow> = self.vt.view().map(row_cells).collect();

        while grid.len() > 1 && grid.last().is_some_and(SnapshotRow::is_blank) {
            grid.pop();
        }

        BufferSnapshot {
            cols: self.cols as u32,
            rows: self.rows as u32,
            viewport_y: self.scrollback_estimate as i32,
            cursor_x: cursor.col as i32,
            cursor_y: cursor.row as i32,
            bell: self.bell_pending,
            grid,
        }
    }

    /// Plain text of the visible viewport, one line per row.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in self.vt.view() {
            let text = line.text();
            out.push_str(text.trim_end());
            out.push('\n');
        }
        while out.ends_with("\n\n") {
            out.pop();
        }
        out
    }

    /// Viewport text with non-default runs wrapped in bracket markers
    /// noting colors and attributes.
    pub fn styled_text(&self) -> String {
        let mut out = String::new();
        for line in self.vt.view() {
            let mut rendered = String::new();
            for cells in line.chunks(|c1, c2| c1.pen() != c2.pen()) {
                let pen = cells[0].pen();
                let style = describe_pen(pen);
                if let Some(ref style) = style {
                    rendered.push_str(&format!("[{style}]"));
                }
                for cell in &cells {
                    rendered.push(cell.char());
                }
                if style.is_some() {
                    rendered.push_str("[/]");
                }
            }
            out.push_str(rendered.trim_end());
            out.push('\n');
        }
        while out.ends_with("\n\n") {
            out.pop();
        }
        out
    }
}

/// Convert one avt line into a trimmed snapshot row.
fn row_cells(line: &avt::Line) -> SnapshotRow {
    let mut cells: Vec<Cell> = Vec::new();
    for group in line.chunks(|c1, c2| c1.pen() != c2.pen()) {
        let pen = group[0].pen();
        let (fg, bg, attrs) = convert_pen(pen);
        for cell in &group {
            let ch = cell.char();
            cells.push(Cell {
                ch: ch.to_string(),
                width: char_display_width(ch),
                fg,
                bg,
                attrs,
            });
        }
    }
    while cells.last().is_some_and(Cell::is_blank) {
        cells.pop();
    }
    SnapshotRow { cells }
}

fn convert_pen(pen: &avt::Pen) -> (Option<CellColor>, Option<CellColor>, u8) {
    let fg = pen.foreground().map(convert_color);
    let bg = pen.background().map(convert_color);
    let mut attrs = 0u8;
    if pen.is_bold() {
        attrs |= ATTR_BOLD;
    }
    if pen.is_faint() {
        attrs |= ATTR_FAINT;
    }
    if pen.is_italic() {
        attrs |= ATTR_ITALIC;
    }
    if pen.is_underline() {
        attrs |= ATTR_UNDERLINE;
    }
    if pen.is_inverse() {
        attrs |= ATTR_INVERSE;
    }
    if pen.is_strikethrough() {
        attrs |= ATTR_STRIKETHROUGH;
    }
    (fg, bg, attrs)
}

fn convert_color(color: avt::Color) -> CellColor {
    match color {
        avt::Color::Indexed(idx) => CellColor::Palette(idx),
        avt::Color::RGB(rgb) => CellColor::Rgb(rgb.r, rgb.g, rgb.b),
    }
}

/// Human-readable pen description for styled text output.
fn describe_pen(pen: &avt::Pen) -> Option<String> {
    if pen.is_default() {
        return None;
    }
    let mut parts = Vec::new();
    if let Some(c) = pen.foreground() {
        parts.push(match c {
            avt::Color::Indexed(i) => format!("fg={i}"),
            avt::Color::RGB(rgb) => format!("fg=#{:02x}{:02x}{:02x}", rgb.r, rgb.g, rgb.b),
        });
    }
    if let Some(c) = pen.background() {
        parts.push(match c {
            avt::Color::Indexed(i) => format!("bg={i}"),
            avt::Color::RGB(rgb) => format!("bg=#{:02x}{:02x}{:02x}", rgb.r, rgb.g, rgb.b),
        });
    }
    if pen.is_bold() {
        parts.push("bold".to_owned());
    }
    if pen.is_italic() {
        parts.push("italic".to_owned());
    }
    if pen.is_underline() {
        parts.push("underline".to_owned());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
#[path = "emulator_tests.rs"]
mod tests;
