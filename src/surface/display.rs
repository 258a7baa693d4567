//! Display lists: scenes lowered to drawing primitives in millimetres

use serde::Serialize;

use crate::scene::{ElementKind, Rect, Scene, ShapeKind, Size};
use crate::symbology::{encode_qr, PayloadError};

/// Point size to millimetres.
pub const PT_TO_MM: f64 = 25.4 / 72.0;

/// Line height as a multiple of the font size.
const LINE_HEIGHT: f64 = 1.2;

/// Rough average glyph advance as a multiple of the font size.
const GLYPH_ADVANCE: f64 = 0.55;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DrawOp {
    FillRect { rect: Rect },
    StrokeRect { rect: Rect, width: f64 },
    Ellipse { rect: Rect, filled: bool, width: f64 },
    Line { x1: f64, y1: f64, x2: f64, y2: f64, width: f64 },
    /// `x`/`y` is the top-left of the text box, `size` the glyph height in mm.
    Text { x: f64, y: f64, size: f64, text: String },
}

impl DrawOp {
    pub fn text(&self) -> Option<&str> {
        match self {
            DrawOp::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Map from label space into a page cell, scaling each axis independently.
    pub fn place(&self, label: Size, cell: Rect) -> DrawOp {
        let sx = if label.width > 0.0 { cell.width / label.width } else { 1.0 };
        let sy = if label.height > 0.0 { cell.height / label.height } else { 1.0 };
        let sw = sx.min(sy);
        let rect = |r: &Rect| Rect::new(cell.x + r.x * sx, cell.y + r.y * sy, r.width * sx, r.height * sy);

        match self {
            DrawOp::FillRect { rect: r } => DrawOp::FillRect { rect: rect(r) },
            DrawOp::StrokeRect { rect: r, width } => DrawOp::StrokeRect { rect: rect(r), width: width * sw },
            DrawOp::Ellipse { rect: r, filled, width } => DrawOp::Ellipse {
                rect: rect(r),
                filled: *filled,
                width: width * sw,
            },
            DrawOp::Line { x1, y1, x2, y2, width } => DrawOp::Line {
                x1: cell.x + x1 * sx,
                y1: cell.y + y1 * sy,
                x2: cell.x + x2 * sx,
                y2: cell.y + y2 * sy,
                width: width * sw,
            },
            DrawOp::Text { x, y, size, text } => DrawOp::Text {
                x: cell.x + x * sx,
                y: cell.y + y * sy,
                size: size * sy,
                text: text.clone(),
            },
        }
    }
}

/// Lower every element of `scene` in label coordinates.
pub fn lower(scene: &Scene) -> Result<Vec<DrawOp>, PayloadError> {
    let mut ops = Vec::new();
    for element in &scene.elements {
        let b = element.bounds;
        match &element.kind {
            ElementKind::Text { content, font_size } => {
                let size = font_size * PT_TO_MM;
                for (i, line) in content.lines().enumerate() {
                    ops.push(DrawOp::Text {
                        x: b.x,
                        y: b.y + i as f64 * size * LINE_HEIGHT,
                        size,
                        text: line.to_string(),
                    });
                }
            }
            ElementKind::Barcode { payload, symbology, show_text } => {
                let modules = symbology.encode(payload)?;
                let band = if *show_text { (b.height * 0.25).min(3.5) } else { 0.0 };
                let bars = Rect::new(b.x, b.y, b.width, b.height - band);
                push_bar_runs(&mut ops, &modules, bars);
                if *show_text {
                    let size = band * 0.9;
                    let estimate = payload.chars().count() as f64 * size * GLYPH_ADVANCE;
                    ops.push(DrawOp::Text {
                        x: b.x + ((b.width - estimate) / 2.0).max(0.0),
                        y: b.y + b.height - band,
                        size,
                        text: payload.clone(),
                    });
                }
            }
            ElementKind::QrCode { payload, ec_level } => {
                let matrix = encode_qr(payload, *ec_level)?;
                let side = b.width.min(b.height);
                let module = side / matrix.width as f64;
                let x0 = b.x + (b.width - side) / 2.0;
                let y0 = b.y + (b.height - side) / 2.0;
                for y in 0..matrix.width {
                    let row: Vec<bool> = (0..matrix.width).map(|x| matrix.is_dark(x, y)).collect();
                    push_bar_runs(&mut ops, &row, Rect::new(x0, y0 + y as f64 * module, side, module));
                }
            }
            ElementKind::Image { .. } => {
                ops.push(DrawOp::StrokeRect { rect: b, width: 0.2 });
                ops.push(DrawOp::Line { x1: b.x, y1: b.y, x2: b.x + b.width, y2: b.y + b.height, width: 0.2 });
                ops.push(DrawOp::Line { x1: b.x, y1: b.y + b.height, x2: b.x + b.width, y2: b.y, width: 0.2 });
            }
            ElementKind::Line { stroke_width } => {
                ops.push(DrawOp::Line {
                    x1: b.x,
                    y1: b.y,
                    x2: b.x + b.width,
                    y2: b.y + b.height,
                    width: *stroke_width,
                });
            }
            ElementKind::Shape { shape, filled } => match shape {
                ShapeKind::Rectangle if *filled => ops.push(DrawOp::FillRect { rect: b }),
                ShapeKind::Rectangle => ops.push(DrawOp::StrokeRect { rect: b, width: 0.3 }),
                ShapeKind::Ellipse => ops.push(DrawOp::Ellipse { rect: b, filled: *filled, width: 0.3 }),
            },
            ElementKind::Table { rows, columns } => {
                ops.push(DrawOp::StrokeRect { rect: b, width: 0.2 });
                for r in 1..*rows {
                    let y = b.y + b.height * r as f64 / *rows as f64;
                    ops.push(DrawOp::Line { x1: b.x, y1: y, x2: b.x + b.width, y2: y, width: 0.2 });
                }
                for c in 1..*columns {
                    let x = b.x + b.width * c as f64 / *columns as f64;
                    ops.push(DrawOp::Line { x1: x, y1: b.y, x2: x, y2: b.y + b.height, width: 0.2 });
                }
            }
        }
    }
    Ok(ops)
}

/// Lower `scene` and place it into `cell` on the page.
pub fn lower_into(scene: &Scene, cell: Rect) -> Result<Vec<DrawOp>, PayloadError> {
    Ok(lower(scene)?.iter().map(|op| op.place(scene.size, cell)).collect())
}

/// Merge consecutive dark modules into filled rectangles across `area`.
fn push_bar_runs(ops: &mut Vec<DrawOp>, modules: &[bool], area: Rect) {
    if modules.is_empty() {
        return;
    }
    let unit = area.width / modules.len() as f64;
    let mut i = 0;
    while i < modules.len() {
        if !modules[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < modules.len() && modules[i] {
            i += 1;
        }
        ops.push(DrawOp::FillRect {
            rect: Rect::new(area.x + start as f64 * unit, area.y, (i - start) as f64 * unit, area.height),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Element;
    use crate::symbology::Symbology;

    #[test]
    fn test_bar_runs_merge() {
        let mut ops = Vec::new();
        push_bar_runs(&mut ops, &[true, true, false, true], Rect::new(0.0, 0.0, 4.0, 1.0));
        assert_eq!(ops, vec![
            DrawOp::FillRect { rect: Rect::new(0.0, 0.0, 2.0, 1.0) },
            DrawOp::FillRect { rect: Rect::new(3.0, 0.0, 1.0, 1.0) },
        ]);
    }

    #[test]
    fn test_text_lines() {
        let scene = Scene::new(Size::new(50.0, 20.0))
            .with_element(Element::text("t", Rect::new(1.0, 1.0, 40.0, 10.0), "first\nsecond"));
        let ops = lower(&scene).unwrap();
        let texts: Vec<_> = ops.iter().filter_map(DrawOp::text).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_barcode_lowering_shows_payload() {
        let scene = Scene::new(Size::new(50.0, 20.0))
            .with_element(Element::barcode("b", Rect::new(0.0, 0.0, 50.0, 20.0), Symbology::Code128, "AB-12"));
        let ops = lower(&scene).unwrap();
        assert!(ops.iter().any(|op| matches!(op, DrawOp::FillRect { .. })));
        assert_eq!(ops.iter().filter_map(DrawOp::text).collect::<Vec<_>>(), vec!["AB-12"]);
    }

    #[test]
    fn test_placement_scales_into_cell() {
        let op = DrawOp::FillRect { rect: Rect::new(10.0, 5.0, 20.0, 10.0) };
        let placed = op.place(Size::new(40.0, 20.0), Rect::new(100.0, 50.0, 80.0, 20.0));
        assert_eq!(placed, DrawOp::FillRect { rect: Rect::new(120.0, 55.0, 40.0, 10.0) });
    }

    #[test]
    fn test_invalid_payload_fails_lowering() {
        let scene = Scene::new(Size::new(50.0, 20.0))
            .with_element(Element::barcode("b", Rect::new(0.0, 0.0, 50.0, 20.0), Symbology::Ean8, "12"));
        assert!(lower(&scene).is_err());
    }
}
