//! Cell and attribute types
//!
//! One cell couples a single codepoint with its foreground and background
//! attributes. A zero codepoint (`'\0'`) marks a padding cell created by
//! cursor movement past the end of a line; it renders as a space.

use std::ops::BitOr;

use bitflags::bitflags;
use unicode_width::UnicodeWidthChar;

/// Cell color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// Inherit from the view's configured foreground/background
    #[default]
    Default,
    /// 256-color palette index (0-7 normal, 8-15 bright, 16-255 extended)
    Indexed(u8),
    /// True Color (24bit RGB)
    Rgb(u8, u8, u8),
}

bitflags! {
    /// Text attribute flags (SGR bold/underline/reverse/blink)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttrFlags: u8 {
        const BOLD      = 0b0001;
        const UNDERLINE = 0b0010;
        const REVERSE   = 0b0100;
        const BLINK     = 0b1000;
    }
}

/// A color plus its attribute flags.
///
/// `Color::Default` is a sentinel resolved against the view's own colors at
/// draw time, not at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attribute {
    pub color: Color,
    pub flags: AttrFlags,
}

impl Attribute {
    /// Attribute inheriting the view color, with no flags set
    pub const DEFAULT: Attribute = Attribute {
        color: Color::Default,
        flags: AttrFlags::empty(),
    };

    /// Attribute with the given color and no flags
    pub fn color(color: Color) -> Self {
        Self {
            color,
            flags: AttrFlags::empty(),
        }
    }

    /// Resolve the default sentinel against a fallback, keeping flags from both
    pub fn resolve(self, fallback: Attribute) -> Attribute {
        let color = match self.color {
            Color::Default => fallback.color,
            other => other,
        };
        Attribute {
            color,
            flags: self.flags | fallback.flags,
        }
    }
}

impl BitOr<AttrFlags> for Attribute {
    type Output = Attribute;

    fn bitor(self, rhs: AttrFlags) -> Attribute {
        Attribute {
            color: self.color,
            flags: self.flags | rhs,
        }
    }
}

/// Which SGR color forms the escape interpreter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// 8-color plus bright variants (SGR 30-37/40-47/90-97/100-107)
    #[default]
    Normal,
    /// Adds the 256-color palette (SGR 38;5;n / 48;5;n)
    Color256,
    /// Adds 24bit RGB (SGR 38;2;r;g;b / 48;2;r;g;b)
    TrueColor,
}

/// Data for one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: Attribute,
    pub bg: Attribute,
}

impl Cell {
    /// Padding cell (`'\0'`, default attributes)
    pub fn blank() -> Cell {
        Cell {
            ch: '\0',
            fg: Attribute::DEFAULT,
            bg: Attribute::DEFAULT,
        }
    }

    /// Display width of the cell's codepoint.
    ///
    /// Padding cells still occupy one column.
    pub fn width(&self) -> usize {
        cell_width(self.ch)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank()
    }
}

/// Display width of a codepoint as it sits in the grid.
///
/// East-asian wide characters take two columns; padding cells take one.
pub fn cell_width(ch: char) -> usize {
    if ch == '\0' {
        return 1;
    }
    ch.width().unwrap_or(1)
}

/// Render a cell row to text, substituting padding cells with spaces
pub fn cells_to_string(cells: &[Cell]) -> String {
    cells
        .iter()
        .map(|c| if c.ch == '\0' { ' ' } else { c.ch })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_default_color() {
        let red = Attribute::color(Color::Indexed(1));
        assert_eq!(Attribute::DEFAULT.resolve(red).color, Color::Indexed(1));
        let green = Attribute::color(Color::Indexed(2));
        assert_eq!(green.resolve(red).color, Color::Indexed(2));
    }

    #[test]
    fn test_flags_union() {
        let attr = Attribute::color(Color::Indexed(4)) | AttrFlags::BOLD;
        assert!(attr.flags.contains(AttrFlags::BOLD));
        let both = attr | AttrFlags::UNDERLINE;
        assert!(both.flags.contains(AttrFlags::BOLD | AttrFlags::UNDERLINE));
        assert_eq!(both.color, Color::Indexed(4));
    }

    #[test]
    fn test_cells_to_string_pads() {
        let cells = vec![
            Cell::blank(),
            Cell {
                ch: 'x',
                ..Cell::blank()
            },
        ];
        assert_eq!(cells_to_string(&cells), " x");
    }

    #[test]
    fn test_cell_width() {
        assert_eq!(cell_width('a'), 1);
        assert_eq!(cell_width('\0'), 1);
        assert_eq!(cell_width('あ'), 2);
    }
}
