//! Screen data model: cells, colors, and the packed color spec.

use bitflags::bitflags;

/// One of the eight protocol colors.
///
/// The discriminants are the values used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Color {
    #[default]
    Black = 0,
    Red = 1,
    Green = 2,
    Brown = 3,
    Blue = 4,
    Magenta = 5,
    Cyan = 6,
    White = 7,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Black,
        Color::Red,
        Color::Green,
        Color::Brown,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
    ];

    /// Look up a color by its three-bit wire value. Only the low three bits are used.
    pub fn from_bits(bits: u16) -> Self {
        Self::ALL[(bits & 0b111) as usize]
    }

    pub fn bits(self) -> u16 {
        self as u16
    }
}

bitflags! {
    /// Independent style attributes of a cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CellFlags: u16 {
        const BOLD = 1 << 0;
        const ITALIC = 1 << 1;
        const UNDERLINE = 1 << 2;
        const STRIKETHROUGH = 1 << 3;
        const REVERSE = 1 << 4;
    }
}

/// Bit-packed color specifier: background in bits 0-2, foreground in bits 3-5,
/// style flags in bits 6-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorSpec(pub u16);

impl ColorSpec {
    /// White on black with no attributes.
    pub const DEFAULT: ColorSpec = ColorSpec(56);

    const FG_SHIFT: u16 = 3;
    const FLAG_SHIFT: u16 = 6;

    pub fn new(fg: Color, bg: Color, flags: CellFlags) -> Self {
        Self(bg.bits() | (fg.bits() << Self::FG_SHIFT) | (flags.bits() << Self::FLAG_SHIFT))
    }

    pub fn background(self) -> Color {
        Color::from_bits(self.0)
    }

    pub fn foreground(self) -> Color {
        Color::from_bits(self.0 >> Self::FG_SHIFT)
    }

    pub fn flags(self) -> CellFlags {
        CellFlags::from_bits_truncate(self.0 >> Self::FLAG_SHIFT)
    }

    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

impl Default for ColorSpec {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A single screen character with its colors and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    /// The character, plus any combining characters that follow it.
    pub data: String,
    pub fg: Color,
    pub bg: Color,
    pub flags: CellFlags,
}

impl Cell {
    /// A cell in the default white-on-black scheme.
    pub fn plain(data: impl Into<String>) -> Self {
        Self::with_spec(data, ColorSpec::DEFAULT)
    }

    pub fn styled(data: impl Into<String>, fg: Color, bg: Color, flags: CellFlags) -> Self {
        Self {
            data: data.into(),
            fg,
            bg,
            flags,
        }
    }

    pub fn with_spec(data: impl Into<String>, spec: ColorSpec) -> Self {
        Self::styled(data, spec.foreground(), spec.background(), spec.flags())
    }

    pub fn spec(&self) -> ColorSpec {
        ColorSpec::new(self.fg, self.bg, self.flags)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::plain(" ")
    }
}

/// One screen row, left to right.
pub type Line = Vec<Cell>;

/// Build a plain line from text, one cell per character.
pub fn plain_line(text: &str) -> Line {
    text.chars().map(|c| Cell::plain(c.to_string())).collect()
}

/// Cursor position. `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub x: u32,
    pub y: u32,
}

/// A full snapshot of the emulated screen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Screen {
    pub lines: Vec<Line>,
    pub cursor: Cursor,
}

impl Screen {
    /// A blank screen of the given size.
    pub fn blank(rows: usize, cols: usize) -> Self {
        Self {
            lines: vec![vec![Cell::default(); cols]; rows],
            cursor: Cursor::default(),
        }
    }

    pub fn rows(&self) -> usize {
        self.lines.len()
    }

    /// The text of a row without styling, handy for assertions and logs.
    pub fn line_text(&self, row: usize) -> Option<String> {
        self.lines
            .get(row)
            .map(|line| line.iter().map(|c| c.data.as_str()).collect())
    }
}
