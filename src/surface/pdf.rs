//! PDF writer built on lopdf

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use super::display::DrawOp;
use super::SurfaceError;
use crate::scene::Size;

/// Millimetres to PDF points.
pub const MM_TO_PT: f64 = 72.0 / 25.4;

/// Bezier control distance for a quarter circle.
const KAPPA: f64 = 0.552_284_75;

/// Ascent of Helvetica as a fraction of the font size.
const ASCENT: f64 = 0.8;

/// In-memory PDF document assembled page by page.
pub struct PdfDocumentBuilder {
    document: Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfDocumentBuilder {
    pub fn new() -> Self {
        let mut document = Document::with_version("1.7");
        let pages_id = document.new_object_id();
        let resources_id = document.new_object_id();

        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        document.objects.insert(
            resources_id,
            Object::Dictionary(dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            }),
        );

        Self {
            document,
            pages_id,
            resources_id,
            page_ids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Append one page of `page_size` millimetres holding `ops`.
    pub fn add_page(&mut self, page_size: Size, ops: &[DrawOp]) -> Result<(), SurfaceError> {
        let width = page_size.width * MM_TO_PT;
        let height = page_size.height * MM_TO_PT;

        let mut painter = PagePainter { height, operations: Vec::new() };
        painter.operations.push(Operation::new("rg", vec![0.into(), 0.into(), 0.into()]));
        painter.operations.push(Operation::new("RG", vec![0.into(), 0.into(), 0.into()]));
        for op in ops {
            painter.draw(op);
        }

        let content = Content { operations: painter.operations };
        let content_id = self.document.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => self.resources_id,
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>, SurfaceError> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| Object::from(*id)).collect();
        self.document.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );
        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.document.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.document.save_to(&mut bytes).map_err(lopdf::Error::from)?;
        Ok(bytes)
    }
}

impl Default for PdfDocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct PagePainter {
    height: f64,
    operations: Vec<Operation>,
}

impl PagePainter {
    fn op(&mut self, operator: &str, operands: Vec<Object>) {
        self.operations.push(Operation::new(operator, operands));
    }

    /// Top-left millimetres to bottom-left points.
    fn point(&self, x: f64, y: f64) -> (f64, f64) {
        (x * MM_TO_PT, self.height - y * MM_TO_PT)
    }

    fn draw(&mut self, op: &DrawOp) {
        match op {
            DrawOp::FillRect { rect } => {
                let (x, y) = self.point(rect.x, rect.y + rect.height);
                self.op("re", vec![x.into(), y.into(), (rect.width * MM_TO_PT).into(), (rect.height * MM_TO_PT).into()]);
                self.op("f", vec![]);
            }
            DrawOp::StrokeRect { rect, width } => {
                let (x, y) = self.point(rect.x, rect.y + rect.height);
                self.op("w", vec![(width * MM_TO_PT).into()]);
                self.op("re", vec![x.into(), y.into(), (rect.width * MM_TO_PT).into(), (rect.height * MM_TO_PT).into()]);
                self.op("S", vec![]);
            }
            DrawOp::Ellipse { rect, filled, width } => {
                let (cx, cy) = self.point(rect.x + rect.width / 2.0, rect.y + rect.height / 2.0);
                let rx = rect.width / 2.0 * MM_TO_PT;
                let ry = rect.height / 2.0 * MM_TO_PT;
                let (kx, ky) = (rx * KAPPA, ry * KAPPA);
                self.op("w", vec![(width * MM_TO_PT).into()]);
                self.op("m", vec![(cx + rx).into(), cy.into()]);
                self.curve(cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry);
                self.curve(cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy);
                self.curve(cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry);
                self.curve(cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy);
                self.op(if *filled { "f" } else { "S" }, vec![]);
            }
            DrawOp::Line { x1, y1, x2, y2, width } => {
                let (ax, ay) = self.point(*x1, *y1);
                let (bx, by) = self.point(*x2, *y2);
                self.op("w", vec![(width * MM_TO_PT).into()]);
                self.op("m", vec![ax.into(), ay.into()]);
                self.op("l", vec![bx.into(), by.into()]);
                self.op("S", vec![]);
            }
            DrawOp::Text { x, y, size, text } => {
                let (tx, ty) = self.point(*x, y + size * ASCENT);
                self.op("BT", vec![]);
                self.op("Tf", vec!["F1".into(), (size * MM_TO_PT).into()]);
                self.op("Td", vec![tx.into(), ty.into()]);
                self.op("Tj", vec![Object::string_literal(win_ansi(text))]);
                self.op("ET", vec![]);
            }
        }
    }

    fn curve(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) {
        self.op("c", vec![x1.into(), y1.into(), x2.into(), y2.into(), x3.into(), y3.into()]);
    }
}

/// Latin-1 subset of WinAnsi; anything else becomes '?'.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Rect;

    #[test]
    fn test_document_has_one_page_per_add() {
        let mut pdf = PdfDocumentBuilder::new();
        let ops = vec![
            DrawOp::FillRect { rect: Rect::new(1.0, 1.0, 5.0, 5.0) },
            DrawOp::Text { x: 2.0, y: 8.0, size: 3.0, text: "Bolt".into() },
        ];
        pdf.add_page(Size::new(50.0, 30.0), &ops).unwrap();
        pdf.add_page(Size::new(50.0, 30.0), &ops).unwrap();
        assert_eq!(pdf.page_count(), 2);

        let bytes = pdf.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.7"));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_win_ansi_replaces_wide_chars() {
        assert_eq!(win_ansi("Aé€"), vec![b'A', 0xE9, b'?']);
    }
}
