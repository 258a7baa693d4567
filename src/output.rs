//! Output Targets - where a job's pages go
//!
//! Output settings arrive from a job file and are validated when the surface
//! is opened, before any data source is touched.

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::surface::{
    FileExportSurface, PreviewSurface, PrinterSurface, RenderSurface, SpoolFileDevice, SurfaceError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Pdf,
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }

    pub fn is_raster(self) -> bool {
        self.image_format().is_some()
    }

    pub fn image_format(self) -> Option<ImageFormat> {
        match self {
            ExportFormat::Pdf => None,
            ExportFormat::Png => Some(ImageFormat::Png),
            ExportFormat::Jpeg => Some(ImageFormat::Jpeg),
        }
    }
}

/// Combined: every page in one document. Separate: one file per page.
/// Raster formats always write one file per page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    #[default]
    Combined,
    Separate,
}

pub const DEFAULT_DPI: u32 = 300;

fn default_dpi() -> u32 {
    DEFAULT_DPI
}

/// Raster resolution for image export and spooled printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterSpec {
    pub dpi: u32,
}

impl Default for RasterSpec {
    fn default() -> Self {
        Self { dpi: DEFAULT_DPI }
    }
}

impl RasterSpec {
    /// Create from a user-supplied value with validation
    pub fn from_user(dpi: u32) -> Result<Self, &'static str> {
        if !(72..=1200).contains(&dpi) {
            return Err("DPI must be between 72 and 1200");
        }
        Ok(Self { dpi })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputTarget {
    /// A printer selected by name. Without a spool path there is no device
    /// to talk to and the job is rejected before it starts.
    #[serde(rename_all = "camelCase")]
    Printer {
        name: String,
        #[serde(default)]
        spool: Option<PathBuf>,
        #[serde(default = "default_dpi")]
        dpi: u32,
    },
    #[serde(rename_all = "camelCase")]
    File {
        path: PathBuf,
        #[serde(default)]
        format: ExportFormat,
        #[serde(default)]
        mode: ExportMode,
        #[serde(default = "default_dpi")]
        dpi: u32,
    },
    Preview,
}

impl OutputTarget {
    pub fn file(path: impl Into<PathBuf>, format: ExportFormat, mode: ExportMode) -> Self {
        OutputTarget::File {
            path: path.into(),
            format,
            mode,
            dpi: DEFAULT_DPI,
        }
    }

    pub fn open_surface(&self) -> Result<Box<dyn RenderSurface>, SurfaceError> {
        match self {
            OutputTarget::Printer { name, spool: None, .. } => Ok(Box::new(PrinterSurface::detached(name.clone()))),
            OutputTarget::Printer { name, spool: Some(path), dpi } => {
                let raster = RasterSpec::from_user(*dpi).map_err(|e| SurfaceError::Setting(e.into()))?;
                let device = SpoolFileDevice::new(name.clone(), path.clone(), raster.dpi);
                Ok(Box::new(PrinterSurface::new(Box::new(device))))
            }
            OutputTarget::File { path, format, mode, dpi } => {
                let raster = RasterSpec::from_user(*dpi).map_err(|e| SurfaceError::Setting(e.into()))?;
                Ok(Box::new(FileExportSurface::new(path.clone(), *format, *mode, raster)))
            }
            OutputTarget::Preview => Ok(Box::new(PreviewSurface::new())),
        }
    }
}
