//! Raster canvas: display lists painted into an RGB bitmap

use image::{ImageFormat, Rgb, RgbImage};
use spleen_font::{PSF2Font, FONT_12X24};
use std::io::Cursor;

use super::display::DrawOp;
use super::SurfaceError;
use crate::scene::{Rect, Size};

const INK: Rgb<u8> = Rgb([0, 0, 0]);
const PAPER: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_W: usize = 12;
const GLYPH_H: usize = 24;

/// Largest bitmap a page may need: A4 at 1200 dpi, with a little headroom.
pub const MAX_PIXELS: u64 = 150_000_000;

/// Pixel count for a length in millimetres at `dpi`.
pub fn mm_to_px(mm: f64, dpi: u32) -> u32 {
    // Absorb float noise so exact sizes do not round up a pixel.
    (mm * f64::from(dpi) / 25.4 - 1e-6).ceil().max(1.0) as u32
}

pub struct RasterCanvas {
    image: RgbImage,
    px_per_mm: f64,
    font: PSF2Font<'static>,
}

impl RasterCanvas {
    /// Fails when the page would need more than `MAX_PIXELS`.
    pub fn check_size(page_size: Size, dpi: u32) -> Result<(u32, u32), SurfaceError> {
        let width = mm_to_px(page_size.width, dpi);
        let height = mm_to_px(page_size.height, dpi);
        let pixels = u64::from(width) * u64::from(height);
        if pixels > MAX_PIXELS {
            return Err(SurfaceError::Setting(format!(
                "page of {}x{} mm at {} dpi needs {} pixels, limit is {}",
                page_size.width, page_size.height, dpi, pixels, MAX_PIXELS
            )));
        }
        Ok((width, height))
    }

    pub fn new(page_size: Size, dpi: u32) -> Result<Self, SurfaceError> {
        let (width, height) = Self::check_size(page_size, dpi)?;
        let font = PSF2Font::new(FONT_12X24).map_err(|e| SurfaceError::Setting(format!("bitmap font: {}", e)))?;
        Ok(Self {
            image: RgbImage::from_pixel(width, height, PAPER),
            px_per_mm: f64::from(dpi) / 25.4,
            font,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_inked(&self, x: u32, y: u32) -> bool {
        x < self.width() && y < self.height() && *self.image.get_pixel(x, y) == INK
    }

    pub fn draw_all(&mut self, ops: &[DrawOp]) {
        for op in ops {
            self.draw(op);
        }
    }

    pub fn draw(&mut self, op: &DrawOp) {
        match op {
            DrawOp::FillRect { rect } => self.fill_mm(*rect),
            DrawOp::StrokeRect { rect, width } => {
                let w = width.max(1.0 / self.px_per_mm);
                self.fill_mm(Rect::new(rect.x, rect.y, rect.width, w));
                self.fill_mm(Rect::new(rect.x, rect.y + rect.height - w, rect.width, w));
                self.fill_mm(Rect::new(rect.x, rect.y, w, rect.height));
                self.fill_mm(Rect::new(rect.x + rect.width - w, rect.y, w, rect.height));
            }
            DrawOp::Ellipse { rect, filled, width } => self.ellipse(*rect, *filled, *width),
            DrawOp::Line { x1, y1, x2, y2, width } => self.line(*x1, *y1, *x2, *y2, *width),
            DrawOp::Text { x, y, size, text } => self.text(*x, *y, *size, text),
        }
    }

    fn fill_px(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) {
        let (w, h) = (i64::from(self.width()), i64::from(self.height()));
        for y in y0.max(0)..y1.min(h) {
            for x in x0.max(0)..x1.min(w) {
                self.image.put_pixel(x as u32, y as u32, INK);
            }
        }
    }

    fn fill_mm(&mut self, rect: Rect) {
        let k = self.px_per_mm;
        let x0 = (rect.x * k).floor() as i64;
        let y0 = (rect.y * k).floor() as i64;
        let x1 = ((rect.x + rect.width) * k).ceil() as i64;
        let y1 = ((rect.y + rect.height) * k).ceil() as i64;
        self.fill_px(x0, y0, x1.max(x0 + 1), y1.max(y0 + 1));
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) {
        let k = self.px_per_mm;
        let thickness = (width * k).round().max(1.0) as i64;
        let half = thickness / 2;
        let steps = ((x2 - x1).abs().max((y2 - y1).abs()) * k).ceil().max(1.0) as i64;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let px = ((x1 + (x2 - x1) * t) * k).round() as i64;
            let py = ((y1 + (y2 - y1) * t) * k).round() as i64;
            self.fill_px(px - half, py - half, px - half + thickness, py - half + thickness);
        }
    }

    fn ellipse(&mut self, rect: Rect, filled: bool, width: f64) {
        let k = self.px_per_mm;
        let (cx, cy) = ((rect.x + rect.width / 2.0) * k, (rect.y + rect.height / 2.0) * k);
        let (rx, ry) = ((rect.width / 2.0 * k).max(0.5), (rect.height / 2.0 * k).max(0.5));
        let band = (width * k).max(1.0);
        let x_range = (cx - rx).floor() as i64..=(cx + rx).ceil() as i64;
        let y_range = (cy - ry).floor() as i64..=(cy + ry).ceil() as i64;

        for y in y_range {
            for x in x_range.clone() {
                let dx = (x as f64 + 0.5 - cx) / rx;
                let dy = (y as f64 + 0.5 - cy) / ry;
                let d = (dx * dx + dy * dy).sqrt();
                let inside = d <= 1.0;
                let on_ring = inside && d >= 1.0 - band / rx.min(ry);
                if inside && (filled || on_ring) {
                    self.fill_px(x, y, x + 1, y + 1);
                }
            }
        }
    }

    fn text(&mut self, x: f64, y: f64, size: f64, text: &str) {
        let k = self.px_per_mm;
        let scale = (size * k) / GLYPH_H as f64;
        if scale <= 0.0 {
            return;
        }
        let origin_y = y * k;
        let mut pen_x = x * k;

        for ch in text.chars() {
            let mut utf8 = [0u8; 4];
            if let Some(glyph) = self.font.glyph_for_utf8(ch.encode_utf8(&mut utf8).as_bytes()) {
                for (row_y, row) in glyph.enumerate() {
                    for (col_x, on) in row.enumerate() {
                        if !on || row_y >= GLYPH_H || col_x >= GLYPH_W {
                            continue;
                        }
                        let px0 = (pen_x + col_x as f64 * scale).floor() as i64;
                        let py0 = (origin_y + row_y as f64 * scale).floor() as i64;
                        let px1 = (pen_x + (col_x + 1) as f64 * scale).ceil() as i64;
                        let py1 = (origin_y + (row_y + 1) as f64 * scale).ceil() as i64;
                        self.fill_px(px0, py0, px1, py1);
                    }
                }
            }
            pen_x += GLYPH_W as f64 * scale;
        }
    }

    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>, SurfaceError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, format)?;
        Ok(buffer.into_inner())
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_dimensions() {
        let canvas = RasterCanvas::new(Size::new(25.4, 12.7), 300).unwrap();
        assert_eq!((canvas.width(), canvas.height()), (300, 150));
        assert_eq!(mm_to_px(0.0, 300), 1);
    }

    #[test]
    fn test_fill_rect_inks_pixels() {
        let mut canvas = RasterCanvas::new(Size::new(10.0, 10.0), 254).unwrap();
        canvas.draw(&DrawOp::FillRect { rect: Rect::new(1.0, 1.0, 2.0, 2.0) });
        assert!(canvas.is_inked(15, 15));
        assert!(!canvas.is_inked(50, 50));
    }

    #[test]
    fn test_text_renders_glyph_pixels() {
        let mut canvas = RasterCanvas::new(Size::new(20.0, 10.0), 300).unwrap();
        canvas.draw(&DrawOp::Text { x: 1.0, y: 1.0, size: 5.0, text: "H".into() });
        let inked = (0..canvas.width())
            .flat_map(|x| (0..canvas.height()).map(move |y| (x, y)))
            .filter(|&(x, y)| canvas.is_inked(x, y))
            .count();
        assert!(inked > 0);
    }

    #[test]
    fn test_png_encoding() {
        let canvas = RasterCanvas::new(Size::new(5.0, 5.0), 100).unwrap();
        let bytes = canvas.encode(ImageFormat::Png).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_oversized_page_rejected() {
        assert!(RasterCanvas::check_size(Size::new(210.0, 297.0), 1200).is_ok());
        let poster = RasterCanvas::new(Size::new(2000.0, 2000.0), 1200);
        assert!(matches!(poster, Err(SurfaceError::Setting(_))));
    }
}
