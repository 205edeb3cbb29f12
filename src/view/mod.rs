//! Terminal view
//!
//! In-memory terminal state for one on-screen region. The view consumes raw
//! pty output (UTF-8 text interleaved with VT escape sequences), maintains a
//! growable cell grid plus a cursor, and projects a wrapped, scrolled slice
//! of that grid for a renderer to draw.
//!
//! Escape sequences are decoded by the [`escape::Interpreter`]; the view
//! applies the resulting [`escape::Instruction`]s to the grid. A single
//! mutex guards all grid state: the pty writer thread, the draw loop and
//! keybinding handlers may touch a view concurrently.

#![allow(dead_code)]

pub mod cell;
pub mod escape;

use std::fmt;
use std::io;
use std::io::Write as _;
use std::sync::{Mutex, MutexGuard};

use log::{trace, warn};

use self::cell::{cells_to_string, AttrFlags, Attribute, Cell, OutputMode};
use self::escape::{FeedResult, Instruction, Interpreter};

/// Tab stops are rendered as a fixed run of spaces
const TAB_WIDTH: usize = 4;

/// Read-side errors. The write path is total and never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewError {
    /// Addressed a cell outside the grid
    InvalidPoint,
    /// Requested a draw with zero columns while wrap is on
    EmptyViewport,
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewError::InvalidPoint => write!(f, "invalid point"),
            ViewError::EmptyViewport => write!(f, "viewport width cannot be 0"),
        }
    }
}

impl std::error::Error for ViewError {}

/// One wrapped slice of a grid line, as shown to the user
#[derive(Debug, Clone)]
struct ViewLine {
    /// Cell offset of this slice within its grid line
    grid_x: usize,
    /// Grid line the slice came from
    grid_y: usize,
    cells: Vec<Cell>,
}

/// One positioned cell of the draw projection, bounded by the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawnCell {
    pub x: usize,
    pub y: usize,
    pub ch: char,
    pub fg: Attribute,
    pub bg: Attribute,
}

/// Snapshot taken when the child enters the 1049 alternate screen
struct AltScreen {
    grid: Vec<Vec<Cell>>,
    cx: usize,
    cy: usize,
    ox: usize,
    oy: usize,
    wrap: bool,
    autoscroll: bool,
}

/// Everything behind the view's lock
struct ViewInner {
    name: String,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,

    /// Cell grid; index 0 is the top. Grows as output arrives.
    grid: Vec<Vec<Cell>>,
    /// Cursor, in grid coordinates
    cx: usize,
    cy: usize,
    /// Viewport origin into the wrapped projection
    ox: usize,
    oy: usize,
    /// Explicit DECSTBM scroll region, 1-based inclusive
    margins: Option<(usize, usize)>,

    wrap: bool,
    autoscroll: bool,
    editable: bool,
    ignore_cr: bool,
    highlight: bool,
    /// A pty is attached and writing into this view
    pty: bool,
    /// Substitute every drawn cell with this rune (password prompts)
    mask: Option<char>,

    /// View default colors, resolved against `Color::Default` cells at draw
    fg: Attribute,
    bg: Attribute,

    alt: Option<AltScreen>,
    /// SCP/RCP slot, independent of the alternate screen snapshot
    saved_cursor: (usize, usize),

    /// Grid has changed since `view_lines` was computed
    tainted: bool,
    view_lines: Vec<ViewLine>,

    interp: Interpreter,
    /// Sink for `Instruction::Write` payloads (device status replies)
    stdin: Option<Box<dyn io::Write + Send>>,

    /// Opaque tag for the outer framework's keybinding dispatch
    context: String,
    /// Name of the view that catches bubbled keybindings
    parent: Option<String>,

    /// Undecoded tail of a UTF-8 sequence split across writes
    pending_bytes: Vec<u8>,
}

/// A named view with an internal buffer and cursor.
///
/// All public methods lock the view for their duration; the handle itself is
/// cheap to share behind an `Arc`.
pub struct View {
    inner: Mutex<ViewInner>,
}

impl View {
    /// Create a view with a name, bounding box and output mode
    pub fn new(name: &str, x0: i32, y0: i32, x1: i32, y1: i32, mode: OutputMode) -> View {
        View {
            inner: Mutex::new(ViewInner {
                name: name.to_string(),
                x0,
                y0,
                x1,
                y1,
                grid: Vec::new(),
                cx: 0,
                cy: 0,
                ox: 0,
                oy: 0,
                margins: None,
                wrap: false,
                autoscroll: false,
                editable: false,
                ignore_cr: false,
                highlight: false,
                pty: false,
                mask: None,
                fg: Attribute::DEFAULT,
                bg: Attribute::DEFAULT,
                alt: None,
                saved_cursor: (0, 0),
                tainted: true,
                view_lines: Vec::new(),
                interp: Interpreter::new(mode),
                stdin: None,
                context: String::new(),
                parent: None,
                pending_bytes: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewInner> {
        // A poisoned lock means a sanity panic on another thread; the state
        // itself is still consistent enough to read
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Bounding box of the view
    pub fn dimensions(&self) -> (i32, i32, i32, i32) {
        let inner = self.lock();
        (inner.x0, inner.y0, inner.x1, inner.y1)
    }

    /// Number of visible columns and rows
    pub fn size(&self) -> (usize, usize) {
        self.lock().size()
    }

    pub fn set_bounds(&self, x0: i32, y0: i32, x1: i32, y1: i32) {
        let mut inner = self.lock();
        inner.x0 = x0;
        inner.y0 = y0;
        inner.x1 = x1;
        inner.y1 = y1;
        inner.tainted = true;
    }

    // ========== Flags ==========

    pub fn wrap(&self) -> bool {
        self.lock().wrap
    }

    pub fn set_wrap(&self, wrap: bool) {
        let mut inner = self.lock();
        inner.wrap = wrap;
        inner.tainted = true;
    }

    pub fn autoscroll(&self) -> bool {
        self.lock().autoscroll
    }

    pub fn set_autoscroll(&self, autoscroll: bool) {
        self.lock().autoscroll = autoscroll;
    }

    pub fn editable(&self) -> bool {
        self.lock().editable
    }

    pub fn set_editable(&self, editable: bool) {
        self.lock().editable = editable;
    }

    pub fn set_ignore_carriage_returns(&self, ignore: bool) {
        self.lock().ignore_cr = ignore;
    }

    pub fn set_highlight(&self, highlight: bool) {
        self.lock().highlight = highlight;
    }

    pub fn set_mask(&self, mask: Option<char>) {
        let mut inner = self.lock();
        inner.mask = mask;
        inner.tainted = true;
    }

    /// Whether a pty is currently attached
    pub fn is_pty(&self) -> bool {
        self.lock().pty
    }

    pub fn set_pty(&self, pty: bool) {
        self.lock().pty = pty;
    }

    pub fn set_colors(&self, fg: Attribute, bg: Attribute) {
        let mut inner = self.lock();
        inner.fg = fg;
        inner.bg = bg;
        inner.tainted = true;
    }

    /// Attach the sink that receives device status replies and forwarded
    /// keystrokes (normally the pty master)
    pub fn set_stdin_writer(&self, writer: Box<dyn io::Write + Send>) {
        self.lock().stdin = Some(writer);
    }

    /// Forward raw bytes to the attached stdin sink
    pub fn write_to_stdin(&self, bytes: &[u8]) {
        self.lock().write_stdin(bytes);
    }

    pub fn keybinding_context(&self) -> String {
        self.lock().context.clone()
    }

    /// Store the opaque keybinding context tag
    pub fn set_keybinding_context(&self, context: &str) {
        self.lock().context = context.to_string();
    }

    pub fn parent_view(&self) -> Option<String> {
        self.lock().parent.clone()
    }

    /// Record the parent view by name. Keybindings unmatched here bubble up
    /// to it; the owning registry resolves the name.
    pub fn set_parent_view(&self, name: Option<&str>) {
        self.lock().parent = name.map(|s| s.to_string());
    }

    // ========== Cursor and origin ==========

    pub fn cursor(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.cx, inner.cy)
    }

    /// Move the cursor to an absolute grid position, padding lines and the
    /// grid as needed
    pub fn set_cursor(&self, x: usize, y: usize) {
        let mut inner = self.lock();
        if inner.grid.is_empty() {
            inner.grid.push(vec![Cell::blank()]);
        }
        inner.move_cursor_to_position(x, y);
        inner.sanity_check();
    }

    pub fn origin(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.ox, inner.oy)
    }

    /// Set the origin of the wrapped projection; the basis of scrolling
    pub fn set_origin(&self, x: usize, y: usize) {
        let mut inner = self.lock();
        inner.ox = x;
        inner.oy = y;
    }

    // ========== Write path ==========

    /// Append raw pty bytes to the view's internal buffer.
    ///
    /// Total: malformed escape sequences are re-emitted as text, incomplete
    /// UTF-8 tails are held until the next call. Returns the number of bytes
    /// accepted, which is always all of them.
    pub fn write(&self, p: &[u8]) -> usize {
        let mut inner = self.lock();
        inner.tainted = true;
        if inner.grid.is_empty() {
            inner.grid.push(vec![Cell::blank()]);
        }
        inner.pending_bytes.extend_from_slice(p);
        let runes = inner.decode_pending();
        for ch in runes {
            inner.process_rune(ch);
        }
        p.len()
    }

    /// Empty the view's internal buffer.
    ///
    /// Configuration flags and scroll margins survive; grid, cursor, origin
    /// and interpreter state reset.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.tainted = true;
        inner.interp.reset();
        inner.grid.clear();
        inner.view_lines.clear();
        inner.pending_bytes.clear();
        inner.cx = 0;
        inner.cy = 0;
        inner.ox = 0;
        inner.oy = 0;
    }

    pub fn is_tainted(&self) -> bool {
        self.lock().tainted
    }

    // ========== Draw projection ==========

    /// Project the view into positioned cells bounded by a `w` x `h`
    /// viewport.
    ///
    /// Recomputes the wrapped line cache when tainted, then applies origin,
    /// autoscroll, default-color resolution, masking and cursor-line
    /// highlighting.
    pub fn draw(&self, w: usize, h: usize) -> Result<Vec<DrawnCell>, ViewError> {
        let mut inner = self.lock();

        if inner.wrap {
            if w == 0 {
                return Err(ViewError::EmptyViewport);
            }
            inner.ox = 0;
        }

        if inner.tainted {
            inner.rebuild_view_lines(w);
            inner.tainted = false;
        }

        if inner.autoscroll && inner.view_lines.len() > h {
            inner.oy = inner.view_lines.len() - h;
        }

        let mut out = Vec::new();
        let mut y = 0;
        for (i, vline) in inner.view_lines.iter().enumerate() {
            if i < inner.oy {
                continue;
            }
            if y >= h {
                break;
            }
            let mut x = 0;
            for (j, c) in vline.cells.iter().enumerate() {
                if j < inner.ox {
                    continue;
                }
                if x >= w {
                    break;
                }

                let (mut ch, mut fg, mut bg) = (c.ch, c.fg.resolve(inner.fg), c.bg.resolve(inner.bg));
                if let Some(mask) = inner.mask {
                    ch = mask;
                    fg = inner.fg;
                    bg = inner.bg;
                } else if inner.highlight && vline.grid_y == inner.cy {
                    fg = fg | AttrFlags::BOLD;
                }
                if ch == '\0' {
                    ch = ' ';
                }

                out.push(DrawnCell { x, y, ch, fg, bg });
                x += c.width();
            }
            y += 1;
        }
        Ok(out)
    }

    // ========== Read-back ==========

    /// Contents of the view's internal buffer as a string
    pub fn buffer(&self) -> String {
        self.lock()
            .grid
            .iter()
            .map(|l| cells_to_string(l))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The lines of the internal buffer
    pub fn buffer_lines(&self) -> Vec<String> {
        self.lock().grid.iter().map(|l| cells_to_string(l)).collect()
    }

    /// Contents of the wrapped buffer shown to the user.
    ///
    /// Reflects the last draw; stale while the view is tainted.
    pub fn view_buffer(&self) -> String {
        self.lock()
            .view_lines
            .iter()
            .map(|vl| cells_to_string(&vl.cells))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The wrapped lines shown to the user
    pub fn view_buffer_lines(&self) -> Vec<String> {
        self.lock()
            .view_lines
            .iter()
            .map(|vl| cells_to_string(&vl.cells))
            .collect()
    }

    /// Count of buffer lines, excluding wrapping
    pub fn lines_height(&self) -> usize {
        self.lock().grid.len()
    }

    /// Count of wrapped lines, as of the last draw
    pub fn view_lines_height(&self) -> usize {
        self.lock().view_lines.len()
    }

    /// The buffer line under the viewport point `(0, y)`
    pub fn line(&self, y: usize) -> Result<String, ViewError> {
        let inner = self.lock();
        let (_, gy) = inner.real_position(0, y);
        let line = inner.grid.get(gy).ok_or(ViewError::InvalidPoint)?;
        Ok(cells_to_string(line))
    }

    /// The space-delimited word under the viewport point `(x, y)`
    pub fn word(&self, x: usize, y: usize) -> Result<String, ViewError> {
        let inner = self.lock();
        let (gx, gy) = inner.real_position(x, y);
        let line = inner.grid.get(gy).ok_or(ViewError::InvalidPoint)?;
        if gx >= line.len() {
            return Err(ViewError::InvalidPoint);
        }

        let chars: Vec<char> = cells_to_string(line).chars().collect();
        let start = chars[..gx]
            .iter()
            .rposition(|&c| c == ' ')
            .map(|i| i + 1)
            .unwrap_or(0);
        let end = chars[gx..]
            .iter()
            .position(|&c| c == ' ')
            .map(|i| i + gx)
            .unwrap_or(chars.len());
        Ok(chars[start..end].iter().collect())
    }
}

impl io::Write for &View {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(View::write(*self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ViewInner {
    fn size(&self) -> (usize, usize) {
        let w = (self.x1 - self.x0 - 1).max(0) as usize;
        let h = (self.y1 - self.y0 - 1).max(0) as usize;
        (w, h)
    }

    /// Invariants that must hold after every mutation. A violation is a
    /// programmer bug, not bad input.
    fn sanity_check(&self) {
        if self.grid.is_empty() {
            panic!("view {}: grid is empty after write", self.name);
        }
        if self.cy >= self.grid.len() {
            panic!(
                "view {}: cy {} outside grid of {} lines",
                self.name,
                self.cy,
                self.grid.len()
            );
        }
        let width = self.grid[self.cy].len();
        if self.cx > width {
            panic!(
                "view {}: cx {} past line of {} cells",
                self.name, self.cx, width
            );
        }
    }

    // ========== Decoding ==========

    /// Drain `pending_bytes` into codepoints, holding back an incomplete
    /// UTF-8 tail for the next write
    fn decode_pending(&mut self) -> Vec<char> {
        let mut out = Vec::new();
        let buf = std::mem::take(&mut self.pending_bytes);
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.extend(s.chars());
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // Unwrap is fine: the prefix was just validated
                    out.extend(std::str::from_utf8(&rest[..valid]).unwrap().chars());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk
                            self.pending_bytes = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    // ========== Write path ==========

    fn process_rune(&mut self, ch: char) {
        match ch {
            '\n' => {
                self.newline();
                self.sanity_check();
            }
            '\r' => {
                if !self.ignore_cr {
                    self.cx = 0;
                }
            }
            _ => match self.interp.feed(ch) {
                FeedResult::InEscape => {}
                FeedResult::Emit(instruction) => {
                    self.apply_instruction(instruction);
                    self.interp.instruction_read();
                    self.sanity_check();
                }
                FeedResult::ParseError => {
                    // Re-emit the buffered runes as text so no byte is lost
                    let (fg, bg) = (self.fg, self.bg);
                    let cells: Vec<Cell> = self
                        .interp
                        .take_runes()
                        .into_iter()
                        .map(|ch| Cell { ch, fg, bg })
                        .collect();
                    self.put_cells(&cells);
                    self.sanity_check();
                }
                FeedResult::NotEscape => {
                    let (fg, bg) = self.interp.cur_attrs();
                    let (ch, repeat) = if ch == '\t' { (' ', TAB_WIDTH) } else { (ch, 1) };
                    let cells = vec![Cell { ch, fg, bg }; repeat];
                    self.put_cells(&cells);
                    self.sanity_check();
                }
            },
        }
    }

    /// Place printable cells at the cursor, appending or overwriting
    fn put_cells(&mut self, cells: &[Cell]) {
        for &c in cells {
            match c.ch {
                // Bell: nothing we can do
                '\x07' => continue,
                '\x08' => {
                    self.cx = self.cx.saturating_sub(1);
                    continue;
                }
                _ => {}
            }
            let cx = self.cx;
            let line = &mut self.grid[self.cy];
            if cx == line.len() {
                line.push(c);
            } else if cx < line.len() {
                line[cx] = c;
            } else {
                panic!(
                    "view {}: cursor {} beyond line of {} cells",
                    self.name,
                    cx,
                    line.len()
                );
            }
            self.cx += 1;
        }

        let (_, height) = self.size();
        if self.cy >= height {
            self.autoscroll = true;
        }
    }

    fn newline(&mut self) {
        self.cx = 0;
        self.cy += 1;
        if let Some((top, bottom)) = self.margins {
            if self.cy == bottom {
                // At the region bottom the content rotates instead of the
                // grid growing
                delete_line(&mut self.grid, top - 1);
                insert_line(&mut self.grid, Vec::new(), bottom - 1);
                self.cy = bottom - 1;
                return;
            }
        }
        if self.cy == self.grid.len() {
            self.grid.push(Vec::new());
        }
    }

    // ========== Instructions ==========

    fn apply_instruction(&mut self, instruction: Instruction) {
        trace!("view {}: {:?}", self.name, instruction);
        match instruction {
            Instruction::CursorUp(n) => self.move_cursor_up(n),
            Instruction::CursorDown(n) => self.move_cursor_down(n),
            Instruction::CursorLeft(n) => self.move_cursor_left(n),
            Instruction::CursorRight(n) => self.move_cursor_right(n),
            Instruction::CursorMove { row, col } => {
                // 1-indexed with 0 meaning 1
                let y = row.max(1) - 1;
                let x = col.max(1) - 1;
                self.move_cursor_to_position(x, y);
            }
            Instruction::EraseInLine(code) => self.erase_in_line(code),
            Instruction::ClearScreen(code) => self.clear_screen(code),
            Instruction::InsertCharacter(n) => {
                let cx = self.cx;
                self.grid[self.cy].splice(cx..cx, std::iter::repeat(Cell::blank()).take(n));
            }
            Instruction::Delete(n) => {
                let cx = self.cx;
                let line = &mut self.grid[self.cy];
                let n = n.min(line.len() - cx);
                line.drain(cx..cx + n);
            }
            Instruction::SaveCursor => self.saved_cursor = (self.cx, self.cy),
            Instruction::RestoreCursor => {
                let (x, y) = self.saved_cursor;
                self.move_cursor_to_position(x, y);
            }
            Instruction::SwitchToAltScreen => self.enter_alt_screen(),
            Instruction::SwitchBackFromAltScreen => self.leave_alt_screen(),
            Instruction::SetScrollMargins { top, bottom } => self.set_scroll_margins(top, bottom),
            Instruction::InsertLines(n) => self.insert_lines(n),
            Instruction::DeleteLines(n) => self.delete_lines(n),
            Instruction::Write(bytes) => self.write_stdin(&bytes),
        }
    }

    fn write_stdin(&mut self, bytes: &[u8]) {
        if let Some(w) = self.stdin.as_mut() {
            if let Err(e) = w.write_all(bytes) {
                warn!("view {}: stdin write failed: {}", self.name, e);
            }
        }
    }

    fn erase_in_line(&mut self, code: usize) {
        let cx = self.cx;
        let line = &mut self.grid[self.cy];
        match code {
            0 => line.truncate(cx),
            1 => {
                // Blank everything before the cursor, keep the rest
                let mut blanked = vec![Cell::blank(); cx];
                blanked.extend_from_slice(&line[cx.min(line.len())..]);
                *line = blanked;
            }
            2 => *line = vec![Cell::blank(); cx + 1],
            _ => {}
        }
    }

    fn clear_screen(&mut self, code: usize) {
        match code {
            0 => {
                let cx = self.cx;
                self.grid[self.cy].truncate(cx);
                self.grid.truncate(self.cy + 1);
            }
            1 => {
                for line in &mut self.grid[..self.cy] {
                    line.clear();
                }
                self.erase_in_line(1);
            }
            2 => {
                self.grid = vec![Vec::new()];
                self.cx = 0;
                self.cy = 0;
                self.ox = 0;
                self.oy = 0;
            }
            _ => {}
        }
    }

    fn set_scroll_margins(&mut self, top: usize, bottom: usize) {
        let (_, height) = self.size();
        let top = if top == 0 { 1 } else { top };
        let bottom = if bottom == 0 { height } else { bottom.min(height) };
        if top <= bottom {
            self.margins = Some((top, bottom));
        }
    }

    /// The active region, falling back to the full viewport
    fn effective_margins(&self) -> (usize, usize) {
        match self.margins {
            Some(m) => m,
            None => {
                let (_, height) = self.size();
                let bottom = if height == 0 { self.grid.len() } else { height };
                (1, bottom.max(1))
            }
        }
    }

    fn insert_lines(&mut self, n: usize) {
        let (top, bottom) = self.effective_margins();
        // 1-based cursor row must sit inside the region
        if self.cy + 1 < top || self.cy + 1 > bottom {
            return;
        }
        for _ in 0..n {
            if self.grid.len() >= bottom {
                delete_line(&mut self.grid, bottom - 1);
            }
            insert_line(&mut self.grid, Vec::new(), self.cy);
        }
        self.pad_cells_for_new_cy();
    }

    fn delete_lines(&mut self, n: usize) {
        let (top, bottom) = self.effective_margins();
        if self.cy + 1 < top || self.cy + 1 > bottom {
            return;
        }
        for _ in 0..n {
            if self.cy < self.grid.len() {
                // Insert below the region bottom first so rows outside the
                // region stay put once the cursor row is removed
                let idx = bottom.min(self.grid.len());
                insert_line(&mut self.grid, Vec::new(), idx);
                delete_line(&mut self.grid, self.cy);
            }
        }
        self.pad_cells_for_new_cy();
    }

    fn enter_alt_screen(&mut self) {
        if self.alt.is_some() {
            return;
        }
        self.alt = Some(AltScreen {
            grid: std::mem::replace(&mut self.grid, vec![vec![Cell::blank()]]),
            cx: self.cx,
            cy: self.cy,
            ox: self.ox,
            oy: self.oy,
            wrap: self.wrap,
            autoscroll: self.autoscroll,
        });
        self.cx = 0;
        self.cy = 0;
        self.ox = 0;
        self.oy = 0;
        self.wrap = false;
        self.autoscroll = false;
    }

    fn leave_alt_screen(&mut self) {
        if let Some(alt) = self.alt.take() {
            self.grid = alt.grid;
            self.cx = alt.cx;
            self.cy = alt.cy;
            self.ox = alt.ox;
            self.oy = alt.oy;
            self.wrap = alt.wrap;
            self.autoscroll = alt.autoscroll;
        }
    }

    // ========== Cursor motion ==========

    /// Pad the current line with blanks up to the cursor column
    fn pad_cells_for_new_cy(&mut self) {
        let cx = self.cx;
        let line = &mut self.grid[self.cy];
        if cx > line.len() {
            line.resize(cx, Cell::blank());
        }
    }

    fn move_cursor_right(&mut self, n: usize) {
        for _ in 0..n {
            if self.cx == self.grid[self.cy].len() {
                self.grid[self.cy].push(Cell::blank());
            }
            self.cx += 1;
        }
    }

    fn move_cursor_left(&mut self, n: usize) {
        self.cx = self.cx.saturating_sub(n);
    }

    fn move_cursor_down(&mut self, n: usize) {
        for _ in 0..n {
            if self.cy == self.grid.len() - 1 {
                self.grid.push(Vec::new());
            }
            self.cy += 1;
        }
        self.pad_cells_for_new_cy();
    }

    fn move_cursor_up(&mut self, n: usize) {
        self.cy = self.cy.saturating_sub(n);
        self.pad_cells_for_new_cy();
    }

    /// Absolute move in grid coordinates; vertical first, because padding
    /// depends on the destination row
    fn move_cursor_to_position(&mut self, x: usize, y: usize) {
        if y >= self.cy {
            self.move_cursor_down(y - self.cy);
        } else {
            self.move_cursor_up(self.cy - y);
        }
        if x >= self.cx {
            self.move_cursor_right(x - self.cx);
        } else {
            self.move_cursor_left(self.cx - x);
        }
    }

    // ========== Projection ==========

    fn rebuild_view_lines(&mut self, w: usize) {
        let wrap_cols = if self.wrap { w } else { 0 };
        let mut vlines = Vec::new();
        for (y, line) in self.grid.iter().enumerate() {
            for (start, cells) in wrap_line(line, wrap_cols) {
                vlines.push(ViewLine {
                    grid_x: start,
                    grid_y: y,
                    cells,
                });
            }
        }
        self.view_lines = vlines;
    }

    /// Translate a viewport point into buffer coordinates via the origin and
    /// the wrapped projection
    fn real_position(&self, vx: usize, vy: usize) -> (usize, usize) {
        let vx = self.ox + vx;
        let vy = self.oy + vy;

        if self.view_lines.is_empty() {
            return (vx, vy);
        }

        if vy < self.view_lines.len() {
            let vline = &self.view_lines[vy];
            (vline.grid_x + vx, vline.grid_y)
        } else {
            let last = &self.view_lines[self.view_lines.len() - 1];
            (vx, last.grid_y + vy - self.view_lines.len() + 1)
        }
    }
}

fn insert_line(lines: &mut Vec<Vec<Cell>>, line: Vec<Cell>, index: usize) {
    if index >= lines.len() {
        lines.push(line);
    } else {
        lines.insert(index, line);
    }
}

fn delete_line(lines: &mut Vec<Vec<Cell>>, index: usize) {
    if index < lines.len() {
        lines.remove(index);
    }
}

/// Split a cell row into display-width slices of at most `columns` columns.
///
/// `columns == 0` disables wrapping. Every row yields at least one slice, so
/// empty grid lines stay addressable in the projection.
fn wrap_line(line: &[Cell], columns: usize) -> Vec<(usize, Vec<Cell>)> {
    if columns == 0 {
        return vec![(0, line.to_vec())];
    }

    let mut slices = Vec::new();
    let mut width = 0;
    let mut offset = 0;
    for (i, cell) in line.iter().enumerate() {
        let w = cell.width();
        width += w;
        if width > columns {
            width = w;
            slices.push((offset, line[offset..i].to_vec()));
            offset = i;
        }
    }
    slices.push((offset, line[offset..].to_vec()));
    slices
}

#[cfg(test)]
mod tests {
    use super::cell::Color;
    use super::*;

    /// A view sized `w` x `h`, wrap and autoscroll off
    fn test_view(w: i32, h: i32) -> View {
        View::new("test", 0, 0, w + 1, h + 1, OutputMode::Normal)
    }

    fn write_str(v: &View, s: &str) {
        v.write(s.as_bytes());
    }

    #[test]
    fn test_plain_text() {
        let v = test_view(80, 24);
        write_str(&v, "hello\nworld");
        assert_eq!(v.buffer(), "hello\nworld");
        assert_eq!(v.cursor(), (5, 1));
        assert_eq!(v.lines_height(), 2);
    }

    #[test]
    fn test_carriage_return_resets_column() {
        let v = test_view(80, 24);
        write_str(&v, "aaaa\rbb");
        assert_eq!(v.buffer(), "bbaa");
        assert_eq!(v.cursor(), (2, 0));
    }

    #[test]
    fn test_ignore_carriage_returns() {
        let v = test_view(80, 24);
        v.set_ignore_carriage_returns(true);
        write_str(&v, "aaaa\rbb");
        assert_eq!(v.buffer(), "aaaabb");
    }

    #[test]
    fn test_tab_expands_to_four_spaces() {
        let v = test_view(80, 24);
        write_str(&v, "ab\tc");
        assert_eq!(v.buffer(), "ab    c");
    }

    #[test]
    fn test_backspace_moves_without_deleting() {
        let v = test_view(80, 24);
        write_str(&v, "abc\x08");
        assert_eq!(v.buffer(), "abc");
        assert_eq!(v.cursor(), (2, 0));
        // The next cell overwrites
        write_str(&v, "X");
        assert_eq!(v.buffer(), "abX");
    }

    #[test]
    fn test_bell_is_ignored() {
        let v = test_view(80, 24);
        write_str(&v, "a\x07b");
        assert_eq!(v.buffer(), "ab");
    }

    #[test]
    fn test_erase_to_end_of_line() {
        let v = test_view(80, 24);
        write_str(&v, "abcdef\x1b[3D\x1b[0K");
        assert_eq!(v.buffer(), "abc");
        assert_eq!(v.cursor(), (3, 0));
        let inner = v.inner.lock().unwrap();
        assert_eq!(inner.grid[0].len(), 3);
    }

    #[test]
    fn test_erase_line_before_cursor() {
        let v = test_view(80, 24);
        write_str(&v, "abcdef\x1b[3D\x1b[1K");
        assert_eq!(v.buffer(), "   def");
        assert_eq!(v.cursor(), (3, 0));
    }

    #[test]
    fn test_erase_entire_line_keeps_cursor() {
        let v = test_view(80, 24);
        write_str(&v, "abcdef\x1b[2D\x1b[2K");
        assert_eq!(v.cursor(), (4, 0));
        assert_eq!(v.buffer(), "     ");
    }

    #[test]
    fn test_absolute_positioning() {
        let v = test_view(80, 24);
        write_str(&v, "\x1b[5;10H*");
        assert_eq!(v.cursor(), (10, 4));
        let inner = v.inner.lock().unwrap();
        assert_eq!(inner.grid.len(), 5);
        assert_eq!(inner.grid[4][9].ch, '*');
        for cell in &inner.grid[4][..9] {
            assert_eq!(cell.ch, '\0');
        }
        drop(inner);
        assert_eq!(v.line(4).unwrap(), "         *");
    }

    #[test]
    fn test_cursor_position_zero_treated_as_one() {
        let v = test_view(80, 24);
        write_str(&v, "x\x1b[0;0H");
        assert_eq!(v.cursor(), (0, 0));
    }

    #[test]
    fn test_cursor_up_clamps_at_zero() {
        let v = test_view(80, 24);
        write_str(&v, "a\nb\x1b[9A");
        assert_eq!(v.cursor(), (1, 0));
    }

    #[test]
    fn test_cursor_right_pads_line() {
        let v = test_view(80, 24);
        write_str(&v, "\x1b[5Cx");
        assert_eq!(v.buffer(), "     x");
        assert_eq!(v.cursor(), (6, 0));
    }

    #[test]
    fn test_insert_and_delete_characters() {
        let v = test_view(80, 24);
        write_str(&v, "abcd\x1b[4D\x1b[2@");
        assert_eq!(v.buffer(), "  abcd");
        write_str(&v, "\x1b[2P");
        assert_eq!(v.buffer(), "abcd");
    }

    #[test]
    fn test_delete_clamps_to_line_end() {
        let v = test_view(80, 24);
        write_str(&v, "abcd\x1b[2D\x1b[99P");
        assert_eq!(v.buffer(), "ab");
    }

    #[test]
    fn test_save_restore_cursor() {
        let v = test_view(80, 24);
        write_str(&v, "abc\x1b[sdef\x1b[uX");
        assert_eq!(v.buffer(), "abcXef");
    }

    #[test]
    fn test_scroll_region_rotates_on_newline() {
        let v = test_view(80, 24);
        write_str(&v, "a\nb\nc\nd\x1b[2;4r\n");
        // Row at top_margin-1 dropped, blank inserted at bottom_margin-1
        assert_eq!(v.buffer_lines(), vec!["a", "c", "d", ""]);
        assert_eq!(v.cursor(), (0, 3));
    }

    #[test]
    fn test_newline_outside_region_appends() {
        let v = test_view(80, 24);
        write_str(&v, "a\nb\nc\nd\x1b[1;2r\n");
        // Cursor is below the region; the grid grows as usual
        assert_eq!(v.buffer_lines(), vec!["a", "b", "c", "d", ""]);
        assert_eq!(v.cursor(), (0, 4));
    }

    #[test]
    fn test_insert_lines_in_region() {
        let v = test_view(80, 24);
        write_str(&v, "a\nb\nc\nd\x1b[2;4r\x1b[2;1H\x1b[1L");
        // Blank pushed in at the cursor, region bottom evicted
        assert_eq!(v.buffer_lines(), vec!["a", "", "b", "c"]);
    }

    #[test]
    fn test_delete_lines_in_region() {
        let v = test_view(80, 24);
        write_str(&v, "a\nb\nc\nd\x1b[1;4r\x1b[2;1H\x1b[1M");
        assert_eq!(v.buffer_lines(), vec!["a", "c", "d", ""]);
    }

    #[test]
    fn test_insert_lines_outside_region_is_noop() {
        let v = test_view(80, 24);
        write_str(&v, "a\nb\nc\nd\x1b[2;3r\x1b[4;1H\x1b[5L");
        assert_eq!(v.buffer_lines(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_alt_screen_round_trip() {
        let v = test_view(80, 24);
        write_str(&v, "A");
        let origin_before = v.origin();
        write_str(&v, "\x1b[?1049h");
        write_str(&v, "B");
        assert_eq!(v.buffer(), "B");
        write_str(&v, "\x1b[?1049l");
        assert_eq!(v.buffer(), "A");
        assert_eq!(v.cursor(), (1, 0));
        assert_eq!(v.origin(), origin_before);
    }

    #[test]
    fn test_alt_screen_disables_wrap_and_autoscroll() {
        let v = test_view(80, 24);
        v.set_wrap(true);
        v.set_autoscroll(true);
        write_str(&v, "A\x1b[?1049h");
        assert!(!v.wrap());
        assert!(!v.autoscroll());
        write_str(&v, "\x1b[?1049l");
        assert!(v.wrap());
        assert!(v.autoscroll());
    }

    #[test]
    fn test_nested_alt_screen_enter_is_noop() {
        let v = test_view(80, 24);
        write_str(&v, "A\x1b[?1049h\x1b[?1049hB\x1b[?1049l");
        assert_eq!(v.buffer(), "A");
    }

    #[test]
    fn test_alt_screen_exit_without_enter_is_noop() {
        let v = test_view(80, 24);
        write_str(&v, "A\x1b[?1049l");
        assert_eq!(v.buffer(), "A");
        assert_eq!(v.cursor(), (1, 0));
    }

    #[test]
    fn test_sgr_coloring() {
        let v = test_view(80, 24);
        write_str(&v, "\x1b[31mred\x1b[0mplain");
        assert_eq!(v.buffer(), "redplain");
        let inner = v.inner.lock().unwrap();
        for cell in &inner.grid[0][..3] {
            assert_eq!(cell.fg.color, Color::Indexed(1));
        }
        for cell in &inner.grid[0][3..] {
            assert_eq!(cell.fg.color, Color::Default);
        }
    }

    #[test]
    fn test_malformed_escape_reemitted_as_text() {
        let v = test_view(80, 24);
        write_str(&v, "a\x1bZb");
        assert_eq!(v.buffer(), "a\x1bZb");
    }

    #[test]
    fn test_clear_empties_buffer() {
        let v = test_view(80, 24);
        write_str(&v, "hello\nworld");
        v.clear();
        assert_eq!(v.buffer(), "");
        assert_eq!(v.cursor(), (0, 0));
        assert!(v.is_tainted());
        // The view accepts writes again afterwards
        write_str(&v, "x");
        assert_eq!(v.buffer(), "x");
    }

    #[test]
    fn test_clear_screen_resets_grid_and_origin() {
        let v = test_view(80, 24);
        v.set_origin(0, 3);
        write_str(&v, "a\nb\nc\x1b[2J");
        assert_eq!(v.buffer(), "");
        assert_eq!(v.cursor(), (0, 0));
        assert_eq!(v.origin(), (0, 0));
        assert_eq!(v.lines_height(), 1);
    }

    #[test]
    fn test_clear_screen_to_end() {
        let v = test_view(80, 24);
        write_str(&v, "aa\nbb\ncc\x1b[2;2H\x1b[0J");
        assert_eq!(v.buffer_lines(), vec!["aa", "b"]);
    }

    #[test]
    fn test_split_utf8_write() {
        let v = test_view(80, 24);
        let bytes = "あ".as_bytes();
        v.write(&bytes[..2]);
        v.write(&bytes[2..]);
        assert_eq!(v.buffer(), "あ");
    }

    #[test]
    fn test_write_returns_all_bytes() {
        let v = test_view(80, 24);
        assert_eq!(v.write(b"abc\x1b[31m"), 7);
    }

    #[test]
    fn test_wrap_projection() {
        let v = test_view(4, 5);
        v.set_wrap(true);
        write_str(&v, "abcdefghij");
        v.draw(4, 5).unwrap();
        assert_eq!(v.view_buffer(), "abcd\nefgh\nij");
        assert_eq!(v.view_lines_height(), 3);
    }

    #[test]
    fn test_wrap_idempotence() {
        let v = test_view(4, 5);
        v.set_wrap(true);
        write_str(&v, "abcdefghij\nklm");
        v.draw(4, 5).unwrap();
        // Re-wrapping the wrapped projection at the same width is a fixpoint
        for line in v.view_buffer_lines() {
            let cells: Vec<Cell> = line
                .chars()
                .map(|ch| Cell {
                    ch,
                    ..Cell::blank()
                })
                .collect();
            assert_eq!(wrap_line(&cells, 4).len(), 1);
        }
    }

    #[test]
    fn test_draw_zero_width_with_wrap_errors() {
        let v = test_view(4, 5);
        v.set_wrap(true);
        write_str(&v, "x");
        assert_eq!(v.draw(0, 5), Err(ViewError::EmptyViewport));
    }

    #[test]
    fn test_wrap_forces_origin_x_to_zero() {
        let v = test_view(4, 5);
        v.set_wrap(true);
        v.set_origin(3, 0);
        write_str(&v, "abcdef");
        v.draw(4, 5).unwrap();
        assert_eq!(v.origin().0, 0);
    }

    #[test]
    fn test_autoscroll_follows_tail() {
        let v = test_view(10, 2);
        v.set_autoscroll(true);
        write_str(&v, "1\n2\n3\n4");
        let cells = v.draw(10, 2).unwrap();
        assert_eq!(v.origin(), (0, 2));
        // Only the last two lines are in the projection
        let drawn: String = cells.iter().map(|c| c.ch).collect();
        assert_eq!(drawn, "34");
    }

    #[test]
    fn test_autoscroll_enabled_by_overflowing_write() {
        let v = test_view(10, 2);
        assert!(!v.autoscroll());
        write_str(&v, "1\n2\n3\nx");
        assert!(v.autoscroll());
    }

    #[test]
    fn test_draw_resolves_default_colors() {
        let v = test_view(10, 5);
        v.set_colors(
            Attribute::color(Color::Indexed(7)),
            Attribute::color(Color::Indexed(0)),
        );
        write_str(&v, "a");
        let cells = v.draw(10, 5).unwrap();
        assert_eq!(cells[0].fg.color, Color::Indexed(7));
        assert_eq!(cells[0].bg.color, Color::Indexed(0));
    }

    #[test]
    fn test_draw_mask_substitutes_rune() {
        let v = test_view(10, 5);
        v.set_mask(Some('*'));
        write_str(&v, "secret");
        let cells = v.draw(10, 5).unwrap();
        assert!(cells.iter().all(|c| c.ch == '*'));
    }

    #[test]
    fn test_draw_highlight_bolds_cursor_line() {
        let v = test_view(10, 5);
        v.set_highlight(true);
        write_str(&v, "aa\nbb");
        let cells = v.draw(10, 5).unwrap();
        for c in &cells {
            let on_cursor_line = c.y == 1;
            assert_eq!(c.fg.flags.contains(AttrFlags::BOLD), on_cursor_line);
        }
    }

    #[test]
    fn test_draw_renders_padding_as_space() {
        let v = test_view(10, 5);
        write_str(&v, "\x1b[1;3Hx");
        let cells = v.draw(10, 5).unwrap();
        assert_eq!(cells[0].ch, ' ');
        assert_eq!(cells[1].ch, ' ');
        assert_eq!(cells[2].ch, 'x');
    }

    #[test]
    fn test_line_and_word() {
        let v = test_view(20, 5);
        write_str(&v, "one two\nthree");
        v.draw(20, 5).unwrap();
        assert_eq!(v.line(0).unwrap(), "one two");
        assert_eq!(v.word(5, 0).unwrap(), "two");
        assert_eq!(v.word(1, 1).unwrap(), "three");
        assert_eq!(v.line(7), Err(ViewError::InvalidPoint));
        assert_eq!(v.word(10, 0), Err(ViewError::InvalidPoint));
    }

    #[test]
    fn test_cursor_invariants_after_mixed_stream() {
        let streams: &[&[u8]] = &[
            b"hello\x1b[5Aworld\x1b[3B\x1b[10C\n\n\x1b[2J",
            b"\x1b[99C\x1b[99D\x1b[5;5Hx\x1b[K\x1b[1K",
            b"\x1b[?1049h\x1b[2;4r\n\n\n\n\n\x1b[?1049l",
            b"\xff\xfe plain \x1b[31m\x1b[0m\x1b Z",
        ];
        for stream in streams {
            let v = test_view(40, 10);
            v.write(stream);
            let inner = v.inner.lock().unwrap();
            assert!(!inner.grid.is_empty());
            assert!(inner.cy < inner.grid.len());
            assert!(inner.cx <= inner.grid[inner.cy].len());
        }
    }

    #[test]
    fn test_device_status_reply_forwarded_to_stdin() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct Sink(Arc<Mutex<Vec<u8>>>);
        impl io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink(Arc::new(Mutex::new(Vec::new())));
        let v = test_view(10, 5);
        v.set_stdin_writer(Box::new(sink.clone()));
        write_str(&v, "\x1b[c");
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"\x1b[?6c");
    }

    #[test]
    fn test_view_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<View>();

        let v = std::sync::Arc::new(test_view(20, 5));
        let writer = {
            let v = v.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    v.write(b"line\n");
                }
            })
        };
        for _ in 0..50 {
            let _ = v.draw(20, 5);
        }
        writer.join().unwrap();
        assert_eq!(v.lines_height(), 101);
    }

    #[test]
    fn test_keybinding_context_and_parent() {
        let v = test_view(10, 5);
        v.set_keybinding_context("editing");
        assert_eq!(v.keybinding_context(), "editing");
        v.set_parent_view(Some("main"));
        assert_eq!(v.parent_view().as_deref(), Some("main"));
    }
}
