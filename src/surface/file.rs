//! File export surface: PDF documents or one raster image per page

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::display::{lower_into, DrawOp};
use super::pdf::PdfDocumentBuilder;
use super::raster::RasterCanvas;
use super::{index_width, OutputFile, PageSetup, PageTag, RenderSurface, SurfaceError, SurfaceJob};
use crate::hashing::sha256_hex;
use crate::output::{ExportFormat, ExportMode, RasterSpec};
use crate::scene::{Rect, Scene, Size};

/// Writes pages under `target`. The target's stem is the base name for
/// every file; its directory is created on demand.
#[derive(Debug, Clone)]
pub struct FileExportSurface {
    target: PathBuf,
    format: ExportFormat,
    mode: ExportMode,
    raster: RasterSpec,
}

impl FileExportSurface {
    pub fn new(target: impl Into<PathBuf>, format: ExportFormat, mode: ExportMode, raster: RasterSpec) -> Self {
        Self {
            target: target.into(),
            format,
            mode,
            raster,
        }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn mode(&self) -> ExportMode {
        self.mode
    }

    fn directory(&self) -> &Path {
        self.target
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn base_name(&self) -> String {
        self.target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "labels".to_string())
    }

    /// Path of the single combined PDF.
    pub fn combined_path(&self) -> PathBuf {
        if self.target.extension().is_some() {
            self.target.clone()
        } else {
            self.target.with_extension(ExportFormat::Pdf.extension())
        }
    }

    /// `<base>_<index>.<ext>`, index zero-padded to `width`.
    pub fn page_path(&self, index: usize, width: usize) -> PathBuf {
        self.directory().join(format!(
            "{}_{:0width$}.{}",
            self.base_name(),
            index,
            self.format.extension(),
            width = width
        ))
    }

    /// `<base>.<ext>` for a raster export of exactly one page.
    pub fn single_path(&self) -> PathBuf {
        self.directory()
            .join(format!("{}.{}", self.base_name(), self.format.extension()))
    }

    fn combines(&self) -> bool {
        self.format == ExportFormat::Pdf && self.mode == ExportMode::Combined
    }
}

impl RenderSurface for FileExportSurface {
    fn name(&self) -> &str {
        "file"
    }

    fn begin_job<'s>(&'s mut self, setup: &PageSetup) -> Result<Box<dyn SurfaceJob + 's>, SurfaceError> {
        if !setup.page_size.is_positive() {
            return Err(SurfaceError::Setting("page size must be positive".into()));
        }
        if self.format.is_raster() {
            RasterCanvas::check_size(setup.page_size, self.raster.dpi)?;
        }
        let dir = self.directory().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| SurfaceError::Io { path: dir, source })?;

        info!(
            path = %self.target.display(),
            format = ?self.format,
            mode = ?self.mode,
            pages = setup.pages,
            "file export started"
        );
        let combined = self.combines().then(PdfDocumentBuilder::new);
        Ok(Box::new(FileJob {
            surface: self,
            setup: *setup,
            combined,
            current: None,
            outputs: Vec::new(),
        }))
    }
}

struct OpenPage {
    tag: PageTag,
    ops: Vec<DrawOp>,
}

struct FileJob<'s> {
    surface: &'s FileExportSurface,
    setup: PageSetup,
    combined: Option<PdfDocumentBuilder>,
    current: Option<OpenPage>,
    outputs: Vec<OutputFile>,
}

impl FileJob<'_> {
    fn page_size(&self) -> Size {
        self.setup.page_size
    }

    fn path_for(&self, tag: PageTag) -> PathBuf {
        if self.surface.format.is_raster() && self.setup.pages == 1 {
            self.surface.single_path()
        } else {
            self.surface.page_path(tag.file_index(), index_width(self.setup.last_index))
        }
    }

    fn write(&mut self, path: PathBuf, bytes: &[u8], pages: usize) -> Result<(), SurfaceError> {
        fs::write(&path, bytes).map_err(|source| SurfaceError::Io { path: path.clone(), source })?;
        debug!(path = %path.display(), bytes = bytes.len(), "file written");
        self.outputs.push(OutputFile {
            sha256: sha256_hex(bytes),
            bytes: bytes.len() as u64,
            path,
            pages,
        });
        Ok(())
    }
}

impl SurfaceJob for FileJob<'_> {
    fn begin_page(&mut self, tag: PageTag) -> Result<(), SurfaceError> {
        if self.current.is_some() {
            return Err(SurfaceError::State("page already open"));
        }
        self.current = Some(OpenPage { tag, ops: Vec::new() });
        Ok(())
    }

    fn paint(&mut self, scene: &Scene, cell: Rect) -> Result<(), SurfaceError> {
        let page = self.current.as_mut().ok_or(SurfaceError::State("paint outside a page"))?;
        page.ops.extend(lower_into(scene, cell)?);
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), SurfaceError> {
        let page = self.current.take().ok_or(SurfaceError::State("no page open"))?;
        let page_size = self.page_size();

        if let Some(document) = self.combined.as_mut() {
            return document.add_page(page_size, &page.ops);
        }

        let path = self.path_for(page.tag);
        let bytes = match self.surface.format.image_format() {
            Some(format) => {
                let mut canvas = RasterCanvas::new(page_size, self.surface.raster.dpi)?;
                canvas.draw_all(&page.ops);
                canvas.encode(format)?
            }
            None => {
                let mut document = PdfDocumentBuilder::new();
                document.add_page(page_size, &page.ops)?;
                document.finish()?
            }
        };
        self.write(path, &bytes, 1)
    }

    fn end_job(mut self: Box<Self>) -> Result<Vec<OutputFile>, SurfaceError> {
        if self.current.is_some() {
            return Err(SurfaceError::State("job finished with a page open"));
        }
        if let Some(document) = self.combined.take() {
            let pages = document.page_count();
            let bytes = document.finish()?;
            let path = self.surface.combined_path();
            self.write(path, &bytes, pages)?;
        }
        info!(files = self.outputs.len(), "file export finished");
        Ok(self.outputs)
    }

    fn abort(self: Box<Self>) {
        let discarded = self.combined.as_ref().map_or(0, PdfDocumentBuilder::page_count);
        warn!(files_kept = self.outputs.len(), pages_discarded = discarded, "file export aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(target: &str, format: ExportFormat, mode: ExportMode) -> FileExportSurface {
        FileExportSurface::new(target, format, mode, RasterSpec::default())
    }

    #[test]
    fn test_page_path_padding() {
        let s = surface("out/batch.pdf", ExportFormat::Pdf, ExportMode::Separate);
        assert_eq!(s.page_path(7, 3), PathBuf::from("out/batch_007.pdf"));
        assert_eq!(s.page_path(1234, 4), PathBuf::from("out/batch_1234.pdf"));
    }

    #[test]
    fn test_combined_path_gets_extension() {
        assert_eq!(
            surface("out/batch", ExportFormat::Pdf, ExportMode::Combined).combined_path(),
            PathBuf::from("out/batch.pdf")
        );
        assert_eq!(
            surface("out/batch.PDF", ExportFormat::Pdf, ExportMode::Combined).combined_path(),
            PathBuf::from("out/batch.PDF")
        );
    }

    #[test]
    fn test_raster_uses_format_extension() {
        let s = surface("labels", ExportFormat::Jpeg, ExportMode::Combined);
        assert_eq!(s.single_path(), PathBuf::from("./labels.jpg"));
        assert_eq!(s.page_path(2, 3), PathBuf::from("./labels_002.jpg"));
    }

    #[test]
    fn test_oversized_raster_page_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("poster").join("big.png");
        let mut s = FileExportSurface::new(&target, ExportFormat::Png, ExportMode::Separate, RasterSpec::from_user(1200).unwrap());
        let setup = PageSetup { page_size: Size::new(2000.0, 2000.0), pages: 1, last_index: 1 };

        assert!(matches!(s.begin_job(&setup), Err(SurfaceError::Setting(_))));
        assert!(!dir.path().join("poster").exists());
    }
}
