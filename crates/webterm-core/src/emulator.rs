//! Screen emulation backed by `alacritty_terminal`.
//!
//! The emulator turns raw child output into a grid of styled cells, tracks which
//! rows changed since they were last collected, and queues any replies the
//! terminal owes the child (device status reports and the like).
//!
//! Damage from the emulator is only a hint: it always includes the cursor row.
//! Candidate rows are compared against what was last handed out, so a row is
//! reported only when its content really differs.

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line as GridLine};
use alacritty_terminal::term::cell::{Cell as GridCell, Flags};
use alacritty_terminal::term::{Config, Term, TermDamage};
use alacritty_terminal::vte::ansi::{Color as AnsiColor, NamedColor, Processor, Rgb};
use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender};
use webterm_types::{Cell, CellFlags, Color, Cursor, Line, Screen};

/// Fixed grid dimensions handed to the emulator.
struct GridSize {
    rows: usize,
    cols: usize,
}

impl Dimensions for GridSize {
    fn total_lines(&self) -> usize {
        self.rows
    }

    fn screen_lines(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.cols
    }
}

/// Forwards emulator events to the owning session.
struct EventProxy {
    tx: Sender<Event>,
}

impl EventListener for EventProxy {
    fn send_event(&self, event: Event) {
        // The receiver only goes away together with the emulator.
        let _ = self.tx.send(event);
    }
}

pub struct Emulator {
    term: Term<EventProxy>,
    parser: Processor,
    events: Receiver<Event>,
    /// Content of each row as of the last `take_changed_lines`.
    shown: Vec<Option<Line>>,
    rows: usize,
    cols: usize,
}

impl Emulator {
    /// A blank screen of `rows` x `cols`. Every row counts as changed until first collected.
    pub fn new(rows: u16, cols: u16) -> Self {
        let size = GridSize {
            rows: rows.max(1) as usize,
            cols: cols.max(1) as usize,
        };
        let config = Config {
            scrolling_history: 0,
            ..Config::default()
        };
        let (tx, events) = mpsc::channel();
        let term = Term::new(config, &size, EventProxy { tx });

        Self {
            term,
            parser: Processor::new(),
            events,
            shown: vec![None; size.rows],
            rows: size.rows,
            cols: size.cols,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Feed raw output bytes through the parser.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.term, bytes);
    }

    /// Rows whose content changed since the previous call, ascending by row.
    pub fn take_changed_lines(&mut self) -> Vec<(usize, Line)> {
        let rows = self.rows;
        let damaged: BTreeSet<usize> = match self.term.damage() {
            TermDamage::Full => (0..rows).collect(),
            TermDamage::Partial(lines) => lines
                .map(|bounds| bounds.line)
                .filter(|row| *row < rows)
                .collect(),
        };
        self.term.reset_damage();

        let mut changed = Vec::new();
        for row in damaged {
            let line = self.line(row);
            if self.shown[row].as_ref() != Some(&line) {
                self.shown[row] = Some(line.clone());
                changed.push((row, line));
            }
        }
        changed
    }

    /// Bytes the emulator wants written back to the child.
    pub fn take_replies(&mut self) -> Vec<u8> {
        let mut replies = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Event::PtyWrite(text) = event {
                replies.extend_from_slice(text.as_bytes());
            }
        }
        replies
    }

    pub fn line(&self, row: usize) -> Line {
        let grid = self.term.grid();
        let grid_row = &grid[GridLine(row as i32)];
        (0..self.cols).map(|col| convert_cell(&grid_row[Column(col)])).collect()
    }

    pub fn cursor(&self) -> Cursor {
        let point = self.term.grid().cursor.point;
        Cursor {
            x: point.column.0 as u32,
            y: point.line.0.max(0) as u32,
        }
    }

    pub fn screen(&self) -> Screen {
        Screen {
            lines: (0..self.rows).map(|row| self.line(row)).collect(),
            cursor: self.cursor(),
        }
    }
}

fn convert_cell(cell: &GridCell) -> Cell {
    let mut data = String::with_capacity(4);
    data.push(cell.c);
    if let Some(combining) = cell.zerowidth() {
        data.extend(combining.iter());
    }

    let mut flags = CellFlags::empty();
    if cell.flags.contains(Flags::BOLD) {
        flags |= CellFlags::BOLD;
    }
    if cell.flags.contains(Flags::ITALIC) {
        flags |= CellFlags::ITALIC;
    }
    if cell.flags.intersects(
        Flags::UNDERLINE
            | Flags::DOUBLE_UNDERLINE
            | Flags::UNDERCURL
            | Flags::DOTTED_UNDERLINE
            | Flags::DASHED_UNDERLINE,
    ) {
        flags |= CellFlags::UNDERLINE;
    }
    if cell.flags.contains(Flags::STRIKEOUT) {
        flags |= CellFlags::STRIKETHROUGH;
    }
    if cell.flags.contains(Flags::INVERSE) {
        flags |= CellFlags::REVERSE;
    }

    Cell {
        data,
        fg: convert_color(cell.fg, Color::White),
        bg: convert_color(cell.bg, Color::Black),
        flags,
    }
}

/// Map an emulator color onto the eight protocol colors. `default` stands in
/// for the emulator's own foreground/background.
fn convert_color(color: AnsiColor, default: Color) -> Color {
    match color {
        AnsiColor::Named(named) => convert_named(named, default),
        AnsiColor::Indexed(index) => convert_indexed(index),
        AnsiColor::Spec(rgb) => nearest_basic(rgb),
    }
}

fn convert_named(named: NamedColor, default: Color) -> Color {
    use NamedColor::*;
    match named {
        Black | BrightBlack | DimBlack => Color::Black,
        Red | BrightRed | DimRed => Color::Red,
        Green | BrightGreen | DimGreen => Color::Green,
        Yellow | BrightYellow | DimYellow => Color::Brown,
        Blue | BrightBlue | DimBlue => Color::Blue,
        Magenta | BrightMagenta | DimMagenta => Color::Magenta,
        Cyan | BrightCyan | DimCyan => Color::Cyan,
        White | BrightWhite | DimWhite => Color::White,
        _ => default,
    }
}

fn convert_indexed(index: u8) -> Color {
    match index {
        0..=7 => Color::from_bits(index as u16),
        8..=15 => Color::from_bits((index - 8) as u16),
        16..=231 => {
            // 6x6x6 color cube
            let cube = index - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
            nearest_basic(Rgb {
                r: level(cube / 36),
                g: level((cube / 6) % 6),
                b: level(cube % 6),
            })
        }
        _ => {
            // 24-step grayscale ramp
            if index >= 244 { Color::White } else { Color::Black }
        }
    }
}

/// Threshold each channel at half intensity: red is bit 0, green bit 1, blue bit 2.
fn nearest_basic(rgb: Rgb) -> Color {
    let bit = |v: u8, b: u16| if v >= 128 { b } else { 0 };
    Color::from_bits(bit(rgb.r, 1) | bit(rgb.g, 2) | bit(rgb.b, 4))
}
