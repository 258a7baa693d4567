//! Label Scene - the element set a batch job prints
//!
//! The editor owns the scene. The print pipeline only reads it and binds
//! record values into a private working copy.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::symbology::{QrEcLevel, Symbology};

/// Width/height in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_positive(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Axis-aligned rectangle in millimetres, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    #[default]
    Rectangle,
    Ellipse,
}

/// Closed set of element variants a label can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ElementKind {
    #[serde(rename_all = "camelCase")]
    Text {
        content: String,
        /// Points.
        #[serde(default = "default_font_size")]
        font_size: f64,
    },
    #[serde(rename_all = "camelCase")]
    Barcode {
        payload: String,
        #[serde(default)]
        symbology: Symbology,
        #[serde(default = "default_true")]
        show_text: bool,
    },
    #[serde(rename = "qrcode", rename_all = "camelCase")]
    QrCode {
        payload: String,
        #[serde(default)]
        ec_level: QrEcLevel,
    },
    Image {
        #[serde(default)]
        source: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Line {
        #[serde(default = "default_stroke")]
        stroke_width: f64,
    },
    Shape {
        #[serde(default)]
        shape: ShapeKind,
        #[serde(default)]
        filled: bool,
    },
    Table {
        rows: u32,
        columns: u32,
    },
}

fn default_font_size() -> f64 { 10.0 }
fn default_true() -> bool { true }
fn default_stroke() -> f64 { 0.3 }

impl ElementKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementKind::Text { .. } => "text",
            ElementKind::Barcode { .. } => "barcode",
            ElementKind::QrCode { .. } => "qrcode",
            ElementKind::Image { .. } => "image",
            ElementKind::Line { .. } => "line",
            ElementKind::Shape { .. } => "shape",
            ElementKind::Table { .. } => "table",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            ElementKind::Text { .. } => Capability::Text,
            ElementKind::Barcode { .. } => Capability::Barcode,
            ElementKind::QrCode { .. } => Capability::QrCode,
            _ => Capability::Other,
        }
    }
}

/// What a batch job may write into an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Barcode,
    QrCode,
    Other,
}

impl Capability {
    pub fn accepts_data(self) -> bool {
        !matches!(self, Capability::Other)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Text => "text",
            Capability::Barcode => "barcode",
            Capability::QrCode => "qrcode",
            Capability::Other => "other",
        };
        f.write_str(name)
    }
}

/// Narrow mutable view over the data-bearing part of an element.
#[derive(Debug)]
pub enum Bindable<'a> {
    Text(&'a mut String),
    Barcode {
        payload: &'a mut String,
        symbology: Symbology,
    },
    QrCode {
        payload: &'a mut String,
        ec_level: QrEcLevel,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub bounds: Rect,
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl Element {
    pub fn new(id: impl Into<String>, bounds: Rect, kind: ElementKind) -> Self {
        Self { id: id.into(), bounds, kind }
    }

    pub fn text(id: impl Into<String>, bounds: Rect, content: impl Into<String>) -> Self {
        Self::new(id, bounds, ElementKind::Text {
            content: content.into(),
            font_size: default_font_size(),
        })
    }

    pub fn barcode(id: impl Into<String>, bounds: Rect, symbology: Symbology, payload: impl Into<String>) -> Self {
        Self::new(id, bounds, ElementKind::Barcode {
            payload: payload.into(),
            symbology,
            show_text: true,
        })
    }

    pub fn qrcode(id: impl Into<String>, bounds: Rect, payload: impl Into<String>) -> Self {
        Self::new(id, bounds, ElementKind::QrCode {
            payload: payload.into(),
            ec_level: QrEcLevel::default(),
        })
    }

    pub fn capability(&self) -> Capability {
        self.kind.capability()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// `None` for elements that carry no bindable data.
    pub fn bindable(&mut self) -> Option<Bindable<'_>> {
        match &mut self.kind {
            ElementKind::Text { content, .. } => Some(Bindable::Text(content)),
            ElementKind::Barcode { payload, symbology, .. } => Some(Bindable::Barcode {
                payload,
                symbology: *symbology,
            }),
            ElementKind::QrCode { payload, ec_level } => Some(Bindable::QrCode {
                payload,
                ec_level: *ec_level,
            }),
            _ => None,
        }
    }

    /// Current displayed text or encoded payload.
    pub fn data(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Text { content, .. } => Some(content),
            ElementKind::Barcode { payload, .. } | ElementKind::QrCode { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub size: Size,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Scene {
    pub fn new(size: Size) -> Self {
        Self { size, elements: Vec::new() }
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn element_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.id == id)
    }
}
