//! Text console on the ramfb framebuffer
//!
//! Glyphs come from embedded-graphics' 8x13 ASCII font. The text itself is
//! kept in a RAM grid so scrolling redraws from memory and never reads
//! pixels back from the framebuffer.

use core::fmt::{self, Write};

use embedded_graphics::{
    Drawable, Pixel,
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Point, Size},
    mono_font::{MonoTextStyle, MonoTextStyleBuilder, ascii::FONT_8X13},
    pixelcolor::{Rgb888, RgbColor},
    text::{Baseline, Text},
};
use spinning_top::Spinlock;

use crate::ramfb;

/// Font cell size in pixels
pub const CHAR_WIDTH: u32 = 8;
pub const CHAR_HEIGHT: u32 = 13;

/// Blank border around the text area
pub const PADDING: u32 = 4;

/// Largest grid kept in RAM (1280x1040 with this font)
const MAX_COLS: usize = 160;
const MAX_ROWS: usize = 80;

const TAB_WIDTH: u32 = 8;

pub const TEXT_COLOR: Rgb888 = Rgb888::new(0xc0, 0xc0, 0xc0);
pub const BG_COLOR: Rgb888 = Rgb888::new(0, 0, 0);

/// XRGB8888 pixel value of `color`
pub fn xrgb(color: Rgb888) -> u32 {
    ((color.r() as u32) << 16) | ((color.g() as u32) << 8) | color.b() as u32
}

// ============================================================================
// embedded-graphics target
// ============================================================================

/// The ramfb framebuffer as an embedded-graphics draw target
struct RamfbDisplay {
    width: u32,
    height: u32,
}

impl OriginDimensions for RamfbDisplay {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for RamfbDisplay {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0 && coord.y >= 0 {
                ramfb::put_pixel(coord.x as u32, coord.y as u32, xrgb(color));
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        ramfb::clear(xrgb(color));
        Ok(())
    }
}

// ============================================================================
// Console state
// ============================================================================

struct FbConsole {
    display: Option<RamfbDisplay>,
    col: u32,
    row: u32,
    cols: u32,
    rows: u32,
    style: MonoTextStyle<'static, Rgb888>,
    text: [[u8; MAX_COLS]; MAX_ROWS],
}

impl FbConsole {
    const fn new() -> Self {
        Self {
            display: None,
            col: 0,
            row: 0,
            cols: 0,
            rows: 0,
            style: MonoTextStyleBuilder::new()
                .font(&FONT_8X13)
                .text_color(TEXT_COLOR)
                .background_color(BG_COLOR)
                .build(),
            text: [[b' '; MAX_COLS]; MAX_ROWS],
        }
    }

    fn init(&mut self, width: u32, height: u32) -> bool {
        let cols = (width.saturating_sub(PADDING * 2) / CHAR_WIDTH).min(MAX_COLS as u32);
        let rows = (height.saturating_sub(PADDING * 2) / CHAR_HEIGHT).min(MAX_ROWS as u32);
        if cols == 0 || rows == 0 {
            return false;
        }
        self.cols = cols;
        self.rows = rows;
        self.display = Some(RamfbDisplay { width, height });
        self.clear();
        true
    }

    fn clear(&mut self) {
        for line in self.text.iter_mut() {
            line.fill(b' ');
        }
        self.col = 0;
        self.row = 0;
        if let Some(display) = self.display.as_mut() {
            let _ = display.clear(BG_COLOR);
        }
    }

    fn putc(&mut self, c: u8) {
        if self.display.is_none() {
            return;
        }
        match c {
            b'\n' => self.newline(),
            b'\r' => self.col = 0,
            b'\t' => {
                let next = (self.col / TAB_WIDTH + 1) * TAB_WIDTH;
                if next >= self.cols {
                    self.newline();
                } else {
                    self.col = next;
                }
            }
            0x20..=0x7e => {
                self.text[self.row as usize][self.col as usize] = c;
                self.draw_cell(self.col, self.row, c);
                self.col += 1;
                if self.col >= self.cols {
                    self.newline();
                }
            }
            _ => {}
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        self.row += 1;
        if self.row >= self.rows {
            self.scroll();
        }
    }

    fn scroll(&mut self) {
        let rows = self.rows as usize;
        self.text.copy_within(1..rows, 0);
        self.text[rows - 1].fill(b' ');
        self.redraw();
        self.row = self.rows - 1;
    }

    /// Repaint the text area from the RAM grid
    fn redraw(&mut self) {
        ramfb::fill_rect(
            PADDING,
            PADDING,
            self.cols * CHAR_WIDTH,
            self.rows * CHAR_HEIGHT,
            xrgb(BG_COLOR),
        );
        let cols = self.cols as usize;
        for row in 0..self.rows {
            let line = self.text[row as usize];
            let len = line[..cols].iter().rposition(|&c| c != b' ').map_or(0, |p| p + 1);
            if let Ok(s) = core::str::from_utf8(&line[..len]) {
                self.draw_str(0, row, s);
            }
        }
    }

    fn draw_cell(&mut self, col: u32, row: u32, c: u8) {
        let buf = [c];
        let s = core::str::from_utf8(&buf).unwrap_or("?");
        self.draw_str(col, row, s);
    }

    fn draw_str(&mut self, col: u32, row: u32, s: &str) {
        let Some(display) = self.display.as_mut() else {
            return;
        };
        if s.is_empty() {
            return;
        }
        let (x, y) = cell_origin(col, row);
        let _ = Text::with_baseline(s, Point::new(x as i32, y as i32), self.style, Baseline::Top)
            .draw(display);
    }
}

impl Write for FbConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.bytes() {
            self.putc(c);
        }
        Ok(())
    }
}

static FB_CONSOLE: Spinlock<FbConsole> = Spinlock::new(FbConsole::new());

// ============================================================================
// Public API
// ============================================================================

/// Top-left pixel of character cell `(col, row)`
pub fn cell_origin(col: u32, row: u32) -> (u32, u32) {
    (PADDING + col * CHAR_WIDTH, PADDING + row * CHAR_HEIGHT)
}

/// Take over the framebuffer as a text screen. Returns false if ramfb is
/// not up or the screen is too small for a single cell.
pub fn init() -> bool {
    let Some(info) = ramfb::info() else {
        return false;
    };
    FB_CONSOLE.lock().init(info.width, info.height)
}

pub fn is_available() -> bool {
    FB_CONSOLE.lock().display.is_some()
}

pub fn putc(c: u8) {
    FB_CONSOLE.lock().putc(c);
}

pub fn puts(s: &str) {
    let _ = FB_CONSOLE.lock().write_str(s);
}

/// `0x` followed by 16 hex digits
pub fn put_hex(value: u64) {
    let _ = write!(FB_CONSOLE.lock(), "{:#018x}", value);
}

/// Blank the screen and home the cursor
pub fn clear() {
    FB_CONSOLE.lock().clear();
}

/// Repaint the text after something else drew over the screen
pub fn redraw() {
    let mut console = FB_CONSOLE.lock();
    if let Some(display) = console.display.as_mut() {
        let _ = display.clear(BG_COLOR);
        console.redraw();
    }
}

/// Cursor as `(col, row)`
pub fn cursor() -> (u32, u32) {
    let console = FB_CONSOLE.lock();
    (console.col, console.row)
}

/// Grid size as `(cols, rows)`
pub fn dimensions() -> (u32, u32) {
    let console = FB_CONSOLE.lock();
    (console.cols, console.rows)
}

/// Run `f` on the text of `row` without trailing blanks.
pub fn with_row<T>(row: u32, f: impl FnOnce(&str) -> T) -> Option<T> {
    let console = FB_CONSOLE.lock();
    if row >= console.rows {
        return None;
    }
    let line = &console.text[row as usize][..console.cols as usize];
    let len = line.iter().rposition(|&c| c != b' ').map_or(0, |p| p + 1);
    core::str::from_utf8(&line[..len]).ok().map(f)
}
