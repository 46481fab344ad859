//! Watermark text rendering
//!
//! Fonts are resolved through a chain: the configured font file, then the
//! platform fonts listed in [`WatermarkSettings::fallback_font_paths`], then a
//! built-in 5x7 bitmap face. The last step cannot fail, which keeps a missing
//! font asset from ever failing a composition.

use crate::WatermarkSettings;
use image::{Rgb, RgbImage};
use rusttype::{point, Font, Scale};
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, warn};

const BITMAP_GLYPH_WIDTH: u32 = 5;
const BITMAP_GLYPH_HEIGHT: u32 = 7;
const BITMAP_ADVANCE: u32 = BITMAP_GLYPH_WIDTH + 1;

/// Column-major 5x7 glyphs for printable ASCII, bit 0 is the top row.
const BITMAP_GLYPHS: [[u8; 5]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00], // ' '
    [0x00, 0x00, 0x5F, 0x00, 0x00], // !
    [0x00, 0x07, 0x00, 0x07, 0x00], // "
    [0x14, 0x7F, 0x14, 0x7F, 0x14], // #
    [0x24, 0x2A, 0x7F, 0x2A, 0x12], // $
    [0x23, 0x13, 0x08, 0x64, 0x62], // %
    [0x36, 0x49, 0x55, 0x22, 0x50], // &
    [0x00, 0x05, 0x03, 0x00, 0x00], // '
    [0x00, 0x1C, 0x22, 0x41, 0x00], // (
    [0x00, 0x41, 0x22, 0x1C, 0x00], // )
    [0x08, 0x2A, 0x1C, 0x2A, 0x08], // *
    [0x08, 0x08, 0x3E, 0x08, 0x08], // +
    [0x00, 0x50, 0x30, 0x00, 0x00], // ,
    [0x08, 0x08, 0x08, 0x08, 0x08], // -
    [0x00, 0x60, 0x60, 0x00, 0x00], // .
    [0x20, 0x10, 0x08, 0x04, 0x02], // /
    [0x3E, 0x51, 0x49, 0x45, 0x3E], // 0
    [0x00, 0x42, 0x7F, 0x40, 0x00], // 1
    [0x42, 0x61, 0x51, 0x49, 0x46], // 2
    [0x21, 0x41, 0x45, 0x4B, 0x31], // 3
    [0x18, 0x14, 0x12, 0x7F, 0x10], // 4
    [0x27, 0x45, 0x45, 0x45, 0x39], // 5
    [0x3C, 0x4A, 0x49, 0x49, 0x30], // 6
    [0x01, 0x71, 0x09, 0x05, 0x03], // 7
    [0x36, 0x49, 0x49, 0x49, 0x36], // 8
    [0x06, 0x49, 0x49, 0x29, 0x1E], // 9
    [0x00, 0x36, 0x36, 0x00, 0x00], // :
    [0x00, 0x56, 0x36, 0x00, 0x00], // ;
    [0x00, 0x08, 0x14, 0x22, 0x41], // <
    [0x14, 0x14, 0x14, 0x14, 0x14], // =
    [0x41, 0x22, 0x14, 0x08, 0x00], // >
    [0x02, 0x01, 0x51, 0x09, 0x06], // ?
    [0x32, 0x49, 0x79, 0x41, 0x3E], // @
    [0x7E, 0x11, 0x11, 0x11, 0x7E], // A
    [0x7F, 0x49, 0x49, 0x49, 0x36], // B
    [0x3E, 0x41, 0x41, 0x41, 0x22], // C
    [0x7F, 0x41, 0x41, 0x22, 0x1C], // D
    [0x7F, 0x49, 0x49, 0x49, 0x41], // E
    [0x7F, 0x09, 0x09, 0x01, 0x01], // F
    [0x3E, 0x41, 0x41, 0x51, 0x32], // G
    [0x7F, 0x08, 0x08, 0x08, 0x7F], // H
    [0x00, 0x41, 0x7F, 0x41, 0x00], // I
    [0x20, 0x40, 0x41, 0x3F, 0x01], // J
    [0x7F, 0x08, 0x14, 0x22, 0x41], // K
    [0x7F, 0x40, 0x40, 0x40, 0x40], // L
    [0x7F, 0x02, 0x04, 0x02, 0x7F], // M
    [0x7F, 0x04, 0x08, 0x10, 0x7F], // N
    [0x3E, 0x41, 0x41, 0x41, 0x3E], // O
    [0x7F, 0x09, 0x09, 0x09, 0x06], // P
    [0x3E, 0x41, 0x51, 0x21, 0x5E], // Q
    [0x7F, 0x09, 0x19, 0x29, 0x46], // R
    [0x46, 0x49, 0x49, 0x49, 0x31], // S
    [0x01, 0x01, 0x7F, 0x01, 0x01], // T
    [0x3F, 0x40, 0x40, 0x40, 0x3F], // U
    [0x1F, 0x20, 0x40, 0x20, 0x1F], // V
    [0x7F, 0x20, 0x18, 0x20, 0x7F], // W
    [0x63, 0x14, 0x08, 0x14, 0x63], // X
    [0x03, 0x04, 0x78, 0x04, 0x03], // Y
    [0x61, 0x51, 0x49, 0x45, 0x43], // Z
    [0x00, 0x00, 0x7F, 0x41, 0x41], // [
    [0x02, 0x04, 0x08, 0x10, 0x20], // \
    [0x41, 0x41, 0x7F, 0x00, 0x00], // ]
    [0x04, 0x02, 0x01, 0x02, 0x04], // ^
    [0x40, 0x40, 0x40, 0x40, 0x40], // _
    [0x00, 0x01, 0x02, 0x04, 0x00], // `
    [0x20, 0x54, 0x54, 0x54, 0x78], // a
    [0x7F, 0x48, 0x44, 0x44, 0x38], // b
    [0x38, 0x44, 0x44, 0x44, 0x20], // c
    [0x38, 0x44, 0x44, 0x48, 0x7F], // d
    [0x38, 0x54, 0x54, 0x54, 0x18], // e
    [0x08, 0x7E, 0x09, 0x01, 0x02], // f
    [0x08, 0x14, 0x54, 0x54, 0x3C], // g
    [0x7F, 0x08, 0x04, 0x04, 0x78], // h
    [0x00, 0x44, 0x7D, 0x40, 0x00], // i
    [0x20, 0x40, 0x44, 0x3D, 0x00], // j
    [0x00, 0x7F, 0x10, 0x28, 0x44], // k
    [0x00, 0x41, 0x7F, 0x40, 0x00], // l
    [0x7C, 0x04, 0x18, 0x04, 0x78], // m
    [0x7C, 0x08, 0x04, 0x04, 0x78], // n
    [0x38, 0x44, 0x44, 0x44, 0x38], // o
    [0x7C, 0x14, 0x14, 0x14, 0x08], // p
    [0x08, 0x14, 0x14, 0x18, 0x7C], // q
    [0x7C, 0x08, 0x04, 0x04, 0x08], // r
    [0x48, 0x54, 0x54, 0x54, 0x20], // s
    [0x04, 0x3F, 0x44, 0x40, 0x20], // t
    [0x3C, 0x40, 0x40, 0x20, 0x7C], // u
    [0x1C, 0x20, 0x40, 0x20, 0x1C], // v
    [0x3C, 0x40, 0x30, 0x40, 0x3C], // w
    [0x44, 0x28, 0x10, 0x28, 0x44], // x
    [0x0C, 0x50, 0x50, 0x50, 0x3C], // y
    [0x44, 0x64, 0x54, 0x4C, 0x44], // z
    [0x00, 0x08, 0x36, 0x41, 0x00], // {
    [0x00, 0x00, 0x7F, 0x00, 0x00], // |
    [0x00, 0x41, 0x36, 0x08, 0x00], // }
    [0x08, 0x04, 0x08, 0x10, 0x08], // ~
];

/// Font resolved for drawing the watermark.
#[derive(Clone)]
pub enum WatermarkFont {
    Outline { font: Font<'static>, size: f32 },
    Bitmap { scale: u32 },
}

impl std::fmt::Debug for WatermarkFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatermarkFont::Outline { size, .. } => f.debug_struct("Outline").field("size", size).finish(),
            WatermarkFont::Bitmap { scale } => f.debug_struct("Bitmap").field("scale", scale).finish(),
        }
    }
}

impl WatermarkFont {
    /// Walks the font chain and never fails.
    pub fn load(settings: &WatermarkSettings) -> Self {
        let candidates = std::iter::once(&settings.font_path).chain(settings.fallback_font_paths.iter());

        for path in candidates {
            if let Some(font) = load_font_file(path) {
                debug!("Using watermark font {}", path.display());
                return WatermarkFont::Outline {
                    font,
                    size: settings.font_size,
                };
            }
        }

        warn!(
            "Watermark font {} unavailable, falling back to built-in bitmap font",
            settings.font_path.display()
        );
        Self::bitmap(settings.font_size)
    }

    /// Built-in face scaled to roughly `font_size` pixels tall.
    pub fn bitmap(font_size: f32) -> Self {
        let scale = (font_size / BITMAP_GLYPH_HEIGHT as f32).round().max(1.0) as u32;
        WatermarkFont::Bitmap { scale }
    }

    pub fn is_bitmap(&self) -> bool {
        matches!(self, WatermarkFont::Bitmap { .. })
    }

    /// This font, shrunk when `text` would be wider than `max_width`.
    ///
    /// Bitmap faces stop at scale 1, so very long text can still overflow.
    pub fn fit_to_width(&self, text: &str, max_width: u32) -> Cow<'_, WatermarkFont> {
        let (width, _) = self.measure(text);
        if width <= max_width {
            return Cow::Borrowed(self);
        }

        match self {
            WatermarkFont::Outline { font, size } => Cow::Owned(WatermarkFont::Outline {
                font: font.clone(),
                size: (size * max_width as f32 / width as f32).floor().max(1.0),
            }),
            WatermarkFont::Bitmap { scale } => {
                let unscaled = width / scale;
                Cow::Owned(WatermarkFont::Bitmap {
                    scale: (max_width / unscaled).max(1),
                })
            }
        }
    }

    /// Pixel width and height of `text` when drawn with this font.
    pub fn measure(&self, text: &str) -> (u32, u32) {
        match self {
            WatermarkFont::Outline { font, size } => {
                let scale = Scale::uniform(*size);
                let v_metrics = font.v_metrics(scale);
                let width = font
                    .layout(text, scale, point(0.0, v_metrics.ascent))
                    .last()
                    .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
                    .unwrap_or(0.0);
                (width.ceil() as u32, (v_metrics.ascent - v_metrics.descent).ceil() as u32)
            }
            WatermarkFont::Bitmap { scale } => {
                let chars = text.chars().count() as u32;
                let width = if chars == 0 {
                    0
                } else {
                    (chars * BITMAP_ADVANCE - 1) * scale
                };
                (width, BITMAP_GLYPH_HEIGHT * scale)
            }
        }
    }

    /// Draws `text` with its top-left corner at (`x`, `y`), clipping to the canvas.
    pub fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        match self {
            WatermarkFont::Outline { font, size } => {
                let scale = Scale::uniform(*size);
                let v_metrics = font.v_metrics(scale);
                let origin = point(x as f32, y as f32 + v_metrics.ascent);

                for glyph in font.layout(text, scale, origin) {
                    if let Some(bb) = glyph.pixel_bounding_box() {
                        glyph.draw(|gx, gy, coverage| {
                            blend_pixel(canvas, bb.min.x + gx as i32, bb.min.y + gy as i32, color, coverage);
                        });
                    }
                }
            }
            WatermarkFont::Bitmap { scale } => {
                let scale = *scale as i32;
                for (index, ch) in text.chars().enumerate() {
                    let columns = bitmap_glyph(ch);
                    let glyph_x = x + index as i32 * BITMAP_ADVANCE as i32 * scale;

                    for (col, bits) in columns.iter().enumerate() {
                        for row in 0..BITMAP_GLYPH_HEIGHT as i32 {
                            if bits & (1 << row) == 0 {
                                continue;
                            }
                            for dy in 0..scale {
                                for dx in 0..scale {
                                    blend_pixel(
                                        canvas,
                                        glyph_x + col as i32 * scale + dx,
                                        y + row * scale + dy,
                                        color,
                                        1.0,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn load_font_file(path: &Path) -> Option<Font<'static>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let font = Font::try_from_vec(bytes);
            if font.is_none() {
                warn!("{} is not a usable font file", path.display());
            }
            font
        }
        Err(e) => {
            debug!("Font {} not readable: {}", path.display(), e);
            None
        }
    }
}

fn bitmap_glyph(ch: char) -> &'static [u8; 5] {
    let code = ch as u32;
    if (0x20..0x7F).contains(&code) {
        &BITMAP_GLYPHS[(code - 0x20) as usize]
    } else {
        &BITMAP_GLYPHS[('?' as u32 - 0x20) as usize]
    }
}

fn blend_pixel(canvas: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= canvas.width() || y as u32 >= canvas.height() || coverage <= 0.0 {
        return;
    }

    let alpha = coverage.min(1.0);
    let inv = 1.0 - alpha;
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    for channel in 0..3 {
        dst.0[channel] = (color.0[channel] as f32 * alpha + dst.0[channel] as f32 * inv).round() as u8;
    }
}
