//! Render Surfaces - "paint one page" over printers, files and in-memory previews
//!
//! A surface hands out a job for the duration of one batch. The job borrows
//! the surface mutably, so nothing else can paint to it until the job is
//! finished or aborted.

pub mod display;
pub mod file;
pub mod pdf;
pub mod preview;
pub mod printer;
pub mod raster;

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::scene::{Rect, Scene, Size};
use crate::symbology::PayloadError;

pub use display::DrawOp;
pub use file::FileExportSurface;
pub use preview::{PreviewPage, PreviewSurface};
pub use printer::{PrinterDevice, PrinterSurface, RasterSpoolDevice, SpoolFileDevice};

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("no printer device attached")]
    NoDevice,

    #[error("unable to start drawing on the printer: {0}")]
    DeviceRefused(String),

    #[error("cannot create new print page: {0}")]
    NewPage(String),

    #[error("printer error: {0}")]
    Device(String),

    #[error("invalid output setting: {0}")]
    Setting(String),

    #[error("surface used out of order: {0}")]
    State(&'static str),

    #[error("cannot render element: {0}")]
    Payload(#[from] PayloadError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// What a surface needs to know before the first page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSetup {
    pub page_size: Size,
    /// Pages the job will emit if it runs to completion.
    pub pages: usize,
    /// Largest index that will appear in a page tag.
    pub last_index: usize,
}

/// Identity of a page: its 1-based position in the job and, when one page
/// carries exactly one record, that record's 1-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageTag {
    pub number: usize,
    pub record: Option<usize>,
}

impl PageTag {
    /// Index used for per-page file names.
    pub fn file_index(&self) -> usize {
        self.record.unwrap_or(self.number)
    }
}

/// A file produced by a surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub path: PathBuf,
    pub pages: usize,
    pub bytes: u64,
    pub sha256: String,
}

pub trait RenderSurface {
    fn name(&self) -> &str;

    /// Cheap readiness check run before any data is touched.
    fn preflight(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn begin_job<'s>(&'s mut self, setup: &PageSetup) -> Result<Box<dyn SurfaceJob + 's>, SurfaceError>;
}

/// One in-progress job on a surface.
pub trait SurfaceJob {
    fn begin_page(&mut self, tag: PageTag) -> Result<(), SurfaceError>;

    /// Paint `scene` scaled into `cell` (page millimetres).
    fn paint(&mut self, scene: &Scene, cell: Rect) -> Result<(), SurfaceError>;

    fn end_page(&mut self) -> Result<(), SurfaceError>;

    fn end_job(self: Box<Self>) -> Result<Vec<OutputFile>, SurfaceError>;

    /// Discard the job. Pages already emitted stay emitted.
    fn abort(self: Box<Self>);
}

/// Zero-padded width for file indices: at least 3 digits.
pub fn index_width(last_index: usize) -> usize {
    last_index.to_string().len().max(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_width() {
        assert_eq!(index_width(1), 3);
        assert_eq!(index_width(999), 3);
        assert_eq!(index_width(1000), 4);
        assert_eq!(index_width(123_456), 6);
    }

    #[test]
    fn test_file_index_prefers_record() {
        assert_eq!(PageTag { number: 1, record: Some(7) }.file_index(), 7);
        assert_eq!(PageTag { number: 2, record: None }.file_index(), 2);
    }
}
