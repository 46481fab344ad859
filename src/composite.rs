//! Composite image rendering
//!
//! Turns a stored raw screenshot into the shareable image: the screenshot on
//! a white canvas, a QR code of the source URL centred below it, and a
//! watermark line at the bottom.
//!
//! ```text
//! +--------------------------+  padding
//! |        screenshot        |  h
//! +--------------------------+  padding
//! |         [ QR ]           |  200
//! +--------------------------+  padding
//! |   Powered by ...         |  40
//! +--------------------------+
//! ```

use crate::{CompositionError, ImageId, ScreenshotError, StorageGateway, WatermarkFont, WatermarkSettings};
use image::imageops;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const PADDING: u32 = 20;
pub const QR_SIDE: u32 = 200;
pub const WATERMARK_HEIGHT: u32 = 40;

/// Minimum light modules surrounding the code.
const QR_QUIET_ZONE: u32 = 4;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Placement of every element on the composite canvas, derived purely from
/// the screenshot dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionLayout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub screenshot_origin: (u32, u32),
    pub qr_origin: (u32, u32),
    pub qr_side: u32,
    /// Top edge of the watermark band
    pub watermark_top: u32,
    pub watermark_height: u32,
}

impl CompositionLayout {
    pub fn for_screenshot(width: u32, height: u32) -> Self {
        let canvas_width = width.max(QR_SIDE + 2 * PADDING);
        let canvas_height = height + QR_SIDE + WATERMARK_HEIGHT + 3 * PADDING;

        Self {
            canvas_width,
            canvas_height,
            screenshot_origin: ((canvas_width - width) / 2, PADDING),
            qr_origin: ((canvas_width - QR_SIDE) / 2, height + 2 * PADDING),
            qr_side: QR_SIDE,
            watermark_top: canvas_height - WATERMARK_HEIGHT,
            watermark_height: WATERMARK_HEIGHT,
        }
    }

    /// Horizontal start and top edge of text of the given size, centred in the band.
    pub fn watermark_origin(&self, text_width: u32, text_height: u32) -> (i32, i32) {
        let x = (self.canvas_width as i32 - text_width as i32) / 2;
        let y = self.watermark_top as i32 + (self.watermark_height as i32 - text_height as i32).max(0) / 2;
        (x, y)
    }
}

/// QR code for `payload` at error correction level L, `side` pixels square.
///
/// The smallest symbol version that fits is chosen and every module is drawn
/// at the same whole number of pixels, centred with extra light margin.
/// Payloads that do not fit any version at level L fail instead of producing
/// a blank code.
pub fn generate_qr(payload: &str, side: u32) -> Result<GrayImage, CompositionError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| CompositionError::EncodingFailed(format!("QR encode error: {e}")))?;

    let modules = code.to_colors();
    let module_count = code.width() as u32;
    let module_pixels = side / (module_count + 2 * QR_QUIET_ZONE);
    if module_pixels == 0 {
        return Err(CompositionError::EncodingFailed(format!(
            "QR symbol of {module_count} modules does not fit in {side}px"
        )));
    }
    let offset = (side - module_count * module_pixels) / 2;

    let mut img = GrayImage::from_pixel(side, side, Luma([255u8]));
    for (i, color) in modules.iter().enumerate() {
        if *color != qrcode::Color::Dark {
            continue;
        }

        let x = offset + (i as u32 % module_count) * module_pixels;
        let y = offset + (i as u32 / module_count) * module_pixels;
        for dy in 0..module_pixels {
            for dx in 0..module_pixels {
                img.put_pixel(x + dx, y + dy, Luma([0u8]));
            }
        }
    }

    Ok(img)
}

/// Lays out screenshot, QR code and watermark and encodes the canvas as PNG.
pub fn render_composite(
    screenshot_png: &[u8],
    source_url: &str,
    font: &WatermarkFont,
    watermark: &WatermarkSettings,
) -> Result<Vec<u8>, CompositionError> {
    let screenshot = image::load_from_memory(screenshot_png)
        .map_err(|e| CompositionError::SourceNotFound(format!("unreadable screenshot: {e}")))?
        .to_rgb8();

    let qr = generate_qr(source_url, QR_SIDE)?;
    let layout = CompositionLayout::for_screenshot(screenshot.width(), screenshot.height());

    let mut canvas = RgbImage::from_pixel(layout.canvas_width, layout.canvas_height, BACKGROUND);

    let (sx, sy) = layout.screenshot_origin;
    imageops::replace(&mut canvas, &screenshot, sx as i64, sy as i64);

    let qr_rgb = DynamicImage::ImageLuma8(qr).to_rgb8();
    let (qx, qy) = layout.qr_origin;
    imageops::replace(&mut canvas, &qr_rgb, qx as i64, qy as i64);

    let font = font.fit_to_width(&watermark.text, layout.canvas_width - 2 * PADDING);
    let (text_width, text_height) = font.measure(&watermark.text);
    let (wx, wy) = layout.watermark_origin(text_width, text_height);
    font.draw(&mut canvas, wx, wy, &watermark.text, Rgb(watermark.color));

    let mut encoded = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .map_err(|e| CompositionError::EncodingFailed(e.to_string()))?;

    Ok(encoded)
}

/// Builds composite images from stored screenshots and stores the result.
#[derive(Clone)]
pub struct CompositeRenderer {
    storage: Arc<dyn StorageGateway>,
    font: Arc<WatermarkFont>,
    watermark: Arc<WatermarkSettings>,
}

impl CompositeRenderer {
    /// Resolves the watermark font chain once for the lifetime of the renderer.
    pub fn new(storage: Arc<dyn StorageGateway>, watermark: WatermarkSettings) -> Self {
        let font = WatermarkFont::load(&watermark);
        Self {
            storage,
            font: Arc::new(font),
            watermark: Arc::new(watermark),
        }
    }

    pub fn font(&self) -> &WatermarkFont {
        &self.font
    }

    /// Composes the stored screenshot `raw_image_id` with a QR code for
    /// `source_url` and returns the identifier of the stored composite.
    pub async fn compose(&self, raw_image_id: &ImageId, source_url: &str) -> Result<ImageId, ScreenshotError> {
        let start_time = Instant::now();

        let raw = self
            .storage
            .resolve(raw_image_id)
            .await
            .map_err(|e| CompositionError::SourceNotFound(format!("{raw_image_id}: {e}")))?;

        let font = self.font.clone();
        let watermark = self.watermark.clone();
        let url = source_url.to_string();
        let composite = tokio::task::spawn_blocking(move || render_composite(&raw, &url, &font, &watermark))
            .await
            .map_err(|e| ScreenshotError::TaskFailed(e.to_string()))??;

        let composite_id = self.storage.save(composite).await?;
        debug!(
            "Composed {} from {} in {:?}",
            composite_id,
            raw_image_id,
            start_time.elapsed()
        );

        Ok(composite_id)
    }
}
