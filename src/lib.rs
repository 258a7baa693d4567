//! LabelBatch Core - variable-data label printing and export
//!
//! # Pipeline
//! 1. Validate once, before any record is read
//! 2. Bind each record into a working copy of the scene
//! 3. Paint one page per record, or tile instances onto paper
//! 4. Stop at the first failure and say which record caused it

pub mod binder;
pub mod hashing;
pub mod job;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod scene;
pub mod source;
pub mod surface;
pub mod symbology;
pub mod validation;

pub use binder::{BindError, Binding, RecordBinder};
pub use hashing::{canonical_json, compute_job_hash, compute_manifest_hash};
pub use job::{Arrangement, BatchJob, ConfigError, JobConfig, RecordRange};
pub use layout::{FillOrder, LayoutError, LayoutGrid, LayoutPlan, PaperSize};
pub use output::{ExportFormat, ExportMode, OutputTarget, RasterSpec};
pub use pipeline::{BatchPrinter, CancelToken, ErrorKind, JobError, JobState, Progress, RenderResult, RunReport};
pub use scene::{Capability, Element, ElementKind, Rect, Scene, Size};
pub use source::{DataSource, DefaultOpener, FieldSelector, Record, SourceConfig, SourceDescriptor, SourceError, SourcePool};
pub use surface::{RenderSurface, SurfaceError};
pub use symbology::{PayloadError, QrEcLevel, Symbology};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
