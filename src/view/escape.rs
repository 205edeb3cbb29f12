//! Escape sequence interpreter
//!
//! Byte-by-byte state machine over the codepoint stream. Recognizes the CSI
//! subset needed to host interactive programs (cursor movement, erase,
//! insert/delete, scroll margins, the 1049 alternate screen, SGR) and emits
//! one [`Instruction`] per completed sequence for the view to apply.
//!
//! SGR is handled inside the interpreter: it mutates the current pen
//! (`cur_fg`/`cur_bg`) and completes without emitting. Every rune seen since
//! `ESC` is buffered so that a malformed sequence can be handed back to the
//! caller as ordinary text. No byte is ever lost.
//!
//! ## References
//! - ECMA-48: Control Functions for Coded Character Sets
//! - Xterm Control Sequences: <https://invisible-island.net/xterm/ctlseqs/ctlseqs.html>

use log::trace;

use super::cell::{AttrFlags, Attribute, Color, OutputMode};

/// Result of feeding one rune to the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResult {
    /// The rune is not part of an escape sequence; print it
    NotEscape,
    /// The rune was consumed mid-sequence (or completed one with no
    /// instruction, e.g. SGR)
    InEscape,
    /// A sequence completed; apply the instruction, then acknowledge with
    /// [`Interpreter::instruction_read`]
    Emit(Instruction),
    /// The sequence is malformed; drain [`Interpreter::take_runes`] and print
    /// the buffered runes
    ParseError,
}

/// The closed instruction set the view applies.
///
/// Count parameters carry their CSI defaults already applied (a missing or
/// zero count arrives as 1). `CursorMove` and `SetScrollMargins` keep raw
/// 1-indexed parameters; zero means "default", resolved by the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    CursorUp(usize),
    CursorDown(usize),
    CursorLeft(usize),
    CursorRight(usize),
    CursorMove { row: usize, col: usize },
    EraseInLine(usize),
    ClearScreen(usize),
    InsertCharacter(usize),
    Delete(usize),
    SaveCursor,
    RestoreCursor,
    SwitchToAltScreen,
    SwitchBackFromAltScreen,
    SetScrollMargins { top: usize, bottom: usize },
    InsertLines(usize),
    DeleteLines(usize),
    /// Reply bytes the host must forward back to the child
    Write(Vec<u8>),
}

/// Primary device attributes reply (VT102)
const DA_REPLY: &[u8] = b"\x1b[?6c";

/// Device status report reply: terminal OK
const DSR_OK_REPLY: &[u8] = b"\x1b[0n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    /// Ordinary text
    #[default]
    Ground,
    /// Just saw ESC
    Escape,
    /// Saw `ESC (` or `ESC )`; the designator rune is swallowed
    Charset,
    /// Inside a CSI sequence, collecting parameters
    Csi,
}

/// Escape sequence interpreter state
pub struct Interpreter {
    state: State,
    /// Every rune since ESC, for parse-failure recovery
    runes: Vec<char>,
    /// Semicolon-separated parameter accumulator
    params: Vec<String>,
    /// Saw the `?` private marker
    private: bool,
    /// Sequence contains markers we do not interpret; swallow it at the final
    discard: bool,
    /// Emitted instruction awaiting acknowledgement
    pending: Option<Instruction>,
    mode: OutputMode,
    cur_fg: Attribute,
    cur_bg: Attribute,
}

impl Interpreter {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            state: State::Ground,
            runes: Vec::new(),
            params: Vec::new(),
            private: false,
            discard: false,
            pending: None,
            mode,
            cur_fg: Attribute::DEFAULT,
            cur_bg: Attribute::DEFAULT,
        }
    }

    /// Current pen applied to printable cells
    pub fn cur_attrs(&self) -> (Attribute, Attribute) {
        (self.cur_fg, self.cur_bg)
    }

    /// Feed one rune. See [`FeedResult`] for the contract.
    pub fn feed(&mut self, ch: char) -> FeedResult {
        if self.pending.is_some() {
            panic!("escape interpreter: feed before instruction_read");
        }

        match self.state {
            State::Ground => {
                if ch == '\x1b' {
                    self.runes.push(ch);
                    self.state = State::Escape;
                    FeedResult::InEscape
                } else {
                    FeedResult::NotEscape
                }
            }
            State::Escape => {
                self.runes.push(ch);
                match ch {
                    '[' => {
                        self.state = State::Csi;
                        self.params.push(String::new());
                        FeedResult::InEscape
                    }
                    '(' | ')' => {
                        self.state = State::Charset;
                        FeedResult::InEscape
                    }
                    _ => FeedResult::ParseError,
                }
            }
            State::Charset => {
                // Swallow the designator (ESC ( B and friends)
                self.runes.push(ch);
                self.reset_sequence();
                FeedResult::InEscape
            }
            State::Csi => {
                self.runes.push(ch);
                match ch {
                    '0'..='9' => {
                        // Always non-empty: seeded on '[' and after every ';'
                        self.params.last_mut().unwrap().push(ch);
                        FeedResult::InEscape
                    }
                    ';' => {
                        self.params.push(String::new());
                        FeedResult::InEscape
                    }
                    '?' => {
                        self.private = true;
                        FeedResult::InEscape
                    }
                    ':' | '<' | '=' | '>' => {
                        self.discard = true;
                        FeedResult::InEscape
                    }
                    '\x20'..='\x2f' => {
                        // Intermediate bytes announce sequences outside our subset
                        self.discard = true;
                        FeedResult::InEscape
                    }
                    '\x40'..='\x7e' => self.dispatch_csi(ch),
                    _ => FeedResult::ParseError,
                }
            }
        }
    }

    /// Acknowledge an emitted instruction so feeding can continue
    pub fn instruction_read(&mut self) {
        self.pending = None;
        self.reset_sequence();
    }

    /// Hand back the runes buffered since ESC and reset the machine.
    ///
    /// Called by the view after a [`FeedResult::ParseError`].
    pub fn take_runes(&mut self) -> Vec<char> {
        let runes = std::mem::take(&mut self.runes);
        self.reset_sequence();
        runes
    }

    /// Full reset, including the current pen. Used by `View::clear`.
    pub fn reset(&mut self) {
        self.reset_sequence();
        self.pending = None;
        self.cur_fg = Attribute::DEFAULT;
        self.cur_bg = Attribute::DEFAULT;
    }

    fn reset_sequence(&mut self) {
        self.state = State::Ground;
        self.runes.clear();
        self.params.clear();
        self.private = false;
        self.discard = false;
    }

    /// Parameter at `index`, with `default` for missing or zero values
    fn param(&self, index: usize, default: usize) -> usize {
        match self.params.get(index).and_then(|p| p.parse().ok()) {
            Some(0) | None => default,
            Some(n) => n,
        }
    }

    /// Parameter at `index` without default substitution (0 stays 0)
    fn raw_param(&self, index: usize) -> usize {
        self.params
            .get(index)
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    fn emit(&mut self, instruction: Instruction) -> FeedResult {
        self.pending = Some(instruction.clone());
        FeedResult::Emit(instruction)
    }

    /// Complete a sequence without an instruction
    fn swallow(&mut self) -> FeedResult {
        self.reset_sequence();
        FeedResult::InEscape
    }

    fn dispatch_csi(&mut self, action: char) -> FeedResult {
        if self.discard {
            trace!("discarding CSI sequence ending in '{}'", action);
            return self.swallow();
        }
        if self.private {
            return self.dispatch_private(action);
        }

        match action {
            'A' => {
                let n = self.param(0, 1);
                self.emit(Instruction::CursorUp(n))
            }
            'B' => {
                let n = self.param(0, 1);
                self.emit(Instruction::CursorDown(n))
            }
            'C' => {
                let n = self.param(0, 1);
                self.emit(Instruction::CursorRight(n))
            }
            'D' => {
                let n = self.param(0, 1);
                self.emit(Instruction::CursorLeft(n))
            }
            'H' | 'f' => {
                // CUP/HVP: row ; col, 1-based; zero resolved by the view
                let row = self.raw_param(0);
                let col = self.raw_param(1);
                self.emit(Instruction::CursorMove { row, col })
            }
            'J' => {
                let code = self.raw_param(0);
                self.emit(Instruction::ClearScreen(code))
            }
            'K' => {
                let code = self.raw_param(0);
                self.emit(Instruction::EraseInLine(code))
            }
            '@' => {
                let n = self.param(0, 1);
                self.emit(Instruction::InsertCharacter(n))
            }
            'P' => {
                let n = self.param(0, 1);
                self.emit(Instruction::Delete(n))
            }
            'L' => {
                let n = self.param(0, 1);
                self.emit(Instruction::InsertLines(n))
            }
            'M' => {
                let n = self.param(0, 1);
                self.emit(Instruction::DeleteLines(n))
            }
            's' => self.emit(Instruction::SaveCursor),
            'u' => self.emit(Instruction::RestoreCursor),
            'r' => {
                // DECSTBM: missing params mean full viewport
                let top = self.raw_param(0);
                let bottom = self.raw_param(1);
                self.emit(Instruction::SetScrollMargins { top, bottom })
            }
            'c' => {
                // DA: identify as a VT102
                self.emit(Instruction::Write(DA_REPLY.to_vec()))
            }
            'n' => match self.raw_param(0) {
                5 => self.emit(Instruction::Write(DSR_OK_REPLY.to_vec())),
                // A cursor position report needs view state we do not have;
                // swallow rather than lie about the position.
                _ => self.swallow(),
            },
            'm' => {
                self.apply_sgr();
                self.swallow()
            }
            _ => {
                trace!("unhandled CSI action '{}', swallowing", action);
                self.swallow()
            }
        }
    }

    fn dispatch_private(&mut self, action: char) -> FeedResult {
        match action {
            'h' | 'l' => {
                // DECSET/DECRST; 1049 is the only mode the view models
                let alt = (0..self.params.len()).any(|i| self.raw_param(i) == 1049);
                if alt && action == 'h' {
                    self.emit(Instruction::SwitchToAltScreen)
                } else if alt {
                    self.emit(Instruction::SwitchBackFromAltScreen)
                } else {
                    trace!("unhandled private mode {:?} '{}'", self.params, action);
                    self.swallow()
                }
            }
            _ => self.swallow(),
        }
    }

    // ========== SGR ==========

    /// Apply an SGR parameter list to the current pen.
    ///
    /// Color forms beyond what the output mode permits are consumed without
    /// effect, so the rest of the list still applies.
    fn apply_sgr(&mut self) {
        let params: Vec<usize> = (0..self.params.len()).map(|i| self.raw_param(i)).collect();

        // Bare `CSI m` means reset
        if self.params.len() == 1 && self.params[0].is_empty() {
            self.cur_fg = Attribute::DEFAULT;
            self.cur_bg = Attribute::DEFAULT;
            return;
        }

        let mut i = 0;
        while i < params.len() {
            let code = params[i];
            match code {
                0 => {
                    self.cur_fg = Attribute::DEFAULT;
                    self.cur_bg = Attribute::DEFAULT;
                }
                1 => self.cur_fg.flags |= AttrFlags::BOLD,
                4 => self.cur_fg.flags |= AttrFlags::UNDERLINE,
                5 => self.cur_fg.flags |= AttrFlags::BLINK,
                7 => self.cur_fg.flags |= AttrFlags::REVERSE,
                21 | 22 => self.cur_fg.flags.remove(AttrFlags::BOLD),
                24 => self.cur_fg.flags.remove(AttrFlags::UNDERLINE),
                25 => self.cur_fg.flags.remove(AttrFlags::BLINK),
                27 => self.cur_fg.flags.remove(AttrFlags::REVERSE),
                30..=37 => self.cur_fg.color = Color::Indexed((code - 30) as u8),
                38 => {
                    let (color, consumed) = self.extended_color(&params[i + 1..]);
                    if let Some(color) = color {
                        self.cur_fg.color = color;
                    }
                    i += consumed;
                }
                39 => self.cur_fg.color = Color::Default,
                40..=47 => self.cur_bg.color = Color::Indexed((code - 40) as u8),
                48 => {
                    let (color, consumed) = self.extended_color(&params[i + 1..]);
                    if let Some(color) = color {
                        self.cur_bg.color = color;
                    }
                    i += consumed;
                }
                49 => self.cur_bg.color = Color::Default,
                90..=97 => self.cur_fg.color = Color::Indexed((code - 90 + 8) as u8),
                100..=107 => self.cur_bg.color = Color::Indexed((code - 100 + 8) as u8),
                other => {
                    trace!("unhandled SGR code {}", other);
                }
            }
            i += 1;
        }
    }

    /// Parse `5;n` / `2;r;g;b` after SGR 38/48.
    ///
    /// Returns the color (None when the output mode forbids the form) and how
    /// many parameters were consumed.
    fn extended_color(&self, rest: &[usize]) -> (Option<Color>, usize) {
        match rest.first() {
            Some(5) => {
                let idx = rest.get(1).copied();
                let consumed = 2.min(rest.len());
                match (idx, self.mode) {
                    (_, OutputMode::Normal) => (None, consumed),
                    (Some(n), _) if n < 256 => (Some(Color::Indexed(n as u8)), consumed),
                    _ => (None, consumed),
                }
            }
            Some(2) => {
                let consumed = 4.min(rest.len());
                if self.mode != OutputMode::TrueColor || rest.len() < 4 {
                    return (None, consumed);
                }
                let (r, g, b) = (rest[1], rest[2], rest[3]);
                if r < 256 && g < 256 && b < 256 {
                    (Some(Color::Rgb(r as u8, g as u8, b as u8)), consumed)
                } else {
                    (None, consumed)
                }
            }
            _ => (None, rest.len().min(1)),
        }
    }
}
