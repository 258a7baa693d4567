//! Printer surface over a device abstraction

use image::ImageFormat;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::display::{lower_into, DrawOp};
use super::raster::RasterCanvas;
use super::{OutputFile, PageSetup, PageTag, RenderSurface, SurfaceError, SurfaceJob};
use crate::scene::{Rect, Scene, Size};

/// A physical (or spooling) print device.
pub trait PrinterDevice: Send {
    fn name(&self) -> &str;

    fn supports_painting(&self) -> bool;

    /// Start drawing the first page.
    fn begin(&mut self, page_size: Size) -> Result<(), SurfaceError>;

    /// Eject the current page and start a new one.
    fn new_page(&mut self) -> Result<(), SurfaceError>;

    fn paint(&mut self, ops: &[DrawOp]) -> Result<(), SurfaceError>;

    fn finish(&mut self) -> Result<(), SurfaceError>;

    fn abort(&mut self) {}
}

pub struct PrinterSurface {
    name: String,
    device: Option<Box<dyn PrinterDevice>>,
}

impl PrinterSurface {
    pub fn new(device: Box<dyn PrinterDevice>) -> Self {
        Self {
            name: device.name().to_string(),
            device: Some(device),
        }
    }

    /// A printer selected by name with no device handle behind it.
    pub fn detached(name: impl Into<String>) -> Self {
        Self { name: name.into(), device: None }
    }
}

impl RenderSurface for PrinterSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn preflight(&self) -> Result<(), SurfaceError> {
        self.device.as_ref().map(|_| ()).ok_or(SurfaceError::NoDevice)
    }

    fn begin_job<'s>(&'s mut self, setup: &PageSetup) -> Result<Box<dyn SurfaceJob + 's>, SurfaceError> {
        let device = self.device.as_deref_mut().ok_or(SurfaceError::NoDevice)?;
        if !device.supports_painting() {
            return Err(SurfaceError::DeviceRefused(format!("{} does not accept paint commands", device.name())));
        }
        device
            .begin(setup.page_size)
            .map_err(|e| SurfaceError::DeviceRefused(e.to_string()))?;
        info!(printer = %self.name, pages = setup.pages, "print job started");
        Ok(Box::new(PrinterJob { device, pages: 0, page_open: false }))
    }
}

struct PrinterJob<'s> {
    device: &'s mut dyn PrinterDevice,
    pages: usize,
    page_open: bool,
}

impl SurfaceJob for PrinterJob<'_> {
    fn begin_page(&mut self, tag: PageTag) -> Result<(), SurfaceError> {
        if self.page_open {
            return Err(SurfaceError::State("page already open"));
        }
        // The device starts on a fresh page; only later pages need a page break.
        if self.pages > 0 {
            self.device.new_page().map_err(|e| match e {
                SurfaceError::NewPage(_) => e,
                other => SurfaceError::NewPage(other.to_string()),
            })?;
        }
        debug!(page = tag.number, record = ?tag.record, "printer page");
        self.page_open = true;
        Ok(())
    }

    fn paint(&mut self, scene: &Scene, cell: Rect) -> Result<(), SurfaceError> {
        if !self.page_open {
            return Err(SurfaceError::State("paint outside a page"));
        }
        let ops = lower_into(scene, cell)?;
        self.device.paint(&ops)
    }

    fn end_page(&mut self) -> Result<(), SurfaceError> {
        if !self.page_open {
            return Err(SurfaceError::State("no page open"));
        }
        self.page_open = false;
        self.pages += 1;
        Ok(())
    }

    fn end_job(self: Box<Self>) -> Result<Vec<OutputFile>, SurfaceError> {
        self.device.finish()?;
        info!(pages = self.pages, "print job finished");
        Ok(Vec::new())
    }

    fn abort(self: Box<Self>) {
        warn!(pages = self.pages, "print job aborted");
        self.device.abort();
    }
}

/// Device that rasterises each page and streams it as PNG to a writer.
pub struct RasterSpoolDevice<W: Write + Send> {
    name: String,
    writer: W,
    dpi: u32,
    canvas: Option<RasterCanvas>,
    page_size: Size,
    pages_spooled: usize,
}

impl<W: Write + Send> RasterSpoolDevice<W> {
    pub fn new(name: impl Into<String>, writer: W, dpi: u32) -> Self {
        Self {
            name: name.into(),
            writer,
            dpi,
            canvas: None,
            page_size: Size::new(0.0, 0.0),
            pages_spooled: 0,
        }
    }

    pub fn pages_spooled(&self) -> usize {
        self.pages_spooled
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn flush_page(&mut self) -> Result<(), SurfaceError> {
        if let Some(canvas) = self.canvas.take() {
            let png = canvas.encode(ImageFormat::Png)?;
            self.writer
                .write_all(&png)
                .map_err(|e| SurfaceError::Device(e.to_string()))?;
            self.pages_spooled += 1;
        }
        Ok(())
    }
}

impl<W: Write + Send> PrinterDevice for RasterSpoolDevice<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_painting(&self) -> bool {
        true
    }

    fn begin(&mut self, page_size: Size) -> Result<(), SurfaceError> {
        if !page_size.is_positive() {
            return Err(SurfaceError::Setting("page size must be positive".into()));
        }
        self.page_size = page_size;
        self.canvas = Some(RasterCanvas::new(page_size, self.dpi)?);
        Ok(())
    }

    fn new_page(&mut self) -> Result<(), SurfaceError> {
        self.flush_page().map_err(|e| SurfaceError::NewPage(e.to_string()))?;
        self.canvas = Some(RasterCanvas::new(self.page_size, self.dpi)?);
        Ok(())
    }

    fn paint(&mut self, ops: &[DrawOp]) -> Result<(), SurfaceError> {
        let canvas = self.canvas.as_mut().ok_or(SurfaceError::State("device not started"))?;
        canvas.draw_all(ops);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SurfaceError> {
        self.flush_page()?;
        self.writer.flush().map_err(|e| SurfaceError::Device(e.to_string()))
    }

    fn abort(&mut self) {
        self.canvas = None;
    }
}

/// Raster spool written to a file. The file is created when the job
/// begins, so a job rejected earlier leaves the previous spool intact.
pub struct SpoolFileDevice {
    name: String,
    path: PathBuf,
    dpi: u32,
    spool: Option<RasterSpoolDevice<BufWriter<File>>>,
}

impl SpoolFileDevice {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            dpi,
            spool: None,
        }
    }

    fn open(&self) -> Result<BufWriter<File>, SurfaceError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| SurfaceError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(&self.path).map_err(|source| SurfaceError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(BufWriter::new(file))
    }

    fn started(&mut self) -> Result<&mut RasterSpoolDevice<BufWriter<File>>, SurfaceError> {
        self.spool.as_mut().ok_or(SurfaceError::State("device not started"))
    }
}

impl PrinterDevice for SpoolFileDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_painting(&self) -> bool {
        true
    }

    fn begin(&mut self, page_size: Size) -> Result<(), SurfaceError> {
        if !page_size.is_positive() {
            return Err(SurfaceError::Setting("page size must be positive".into()));
        }
        RasterCanvas::check_size(page_size, self.dpi)?;
        let mut spool = RasterSpoolDevice::new(self.name.clone(), self.open()?, self.dpi);
        spool.begin(page_size)?;
        debug!(path = %self.path.display(), "spool file opened");
        self.spool = Some(spool);
        Ok(())
    }

    fn new_page(&mut self) -> Result<(), SurfaceError> {
        self.started()?.new_page()
    }

    fn paint(&mut self, ops: &[DrawOp]) -> Result<(), SurfaceError> {
        self.started()?.paint(ops)
    }

    fn finish(&mut self) -> Result<(), SurfaceError> {
        self.started()?.finish()
    }

    fn abort(&mut self) {
        if let Some(spool) = self.spool.as_mut() {
            spool.abort();
        }
    }
}
