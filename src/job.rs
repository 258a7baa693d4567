//! Batch Job - one print/export request as a plain value
//!
//! A job file is JSON with camelCase keys. Everything except the scene and
//! the output target has a default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::binder::Binding;
use crate::layout::{LayoutError, LayoutGrid, LayoutPlan, Placement, PlannedPage};
use crate::output::OutputTarget;
use crate::scene::{Rect, Scene, Size};
use crate::source::SourceConfig;

fn default_start() -> usize { 1 }

/// Inclusive 1-based record range. An absent end means "through the last record".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRange {
    #[serde(default = "default_start")]
    pub start: usize,
    #[serde(default)]
    pub end: Option<usize>,
}

impl Default for RecordRange {
    fn default() -> Self {
        Self::all()
    }
}

impl RecordRange {
    pub fn all() -> Self {
        Self { start: 1, end: None }
    }

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end: Some(end) }
    }

    /// Concrete bounds against `count` records, or `None` when the range
    /// falls outside `[1, count]`.
    pub fn resolve(&self, count: usize) -> Option<(usize, usize)> {
        let end = self.end.unwrap_or(count);
        (self.start >= 1 && self.start <= end && end <= count).then_some((self.start, end))
    }
}

/// How instances are arranged on output pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Arrangement {
    /// One page per instance, page size = label size.
    #[default]
    PerRecord,
    /// Multi-up on a paper grid.
    Tiled(LayoutGrid),
}

impl Arrangement {
    pub fn is_tiled(&self) -> bool {
        matches!(self, Arrangement::Tiled(_))
    }

    /// Rejects a non-positive label and a grid that breaks its own bounds.
    pub fn check(&self, label: Size) -> Result<(), LayoutError> {
        if !label.is_positive() {
            return Err(LayoutError::Geometry("label size must be positive".into()));
        }
        match self {
            Arrangement::Tiled(grid) => grid.check(),
            Arrangement::PerRecord => Ok(()),
        }
    }

    /// Page plan for `count` instances of a `label`-sized scene. A valid
    /// tiled grid is clamped to what fits on the paper.
    pub fn plan(&self, label: Size, count: usize) -> Result<LayoutPlan, LayoutError> {
        self.check(label)?;
        match self {
            Arrangement::Tiled(grid) => grid.fitted(label).plan(label, count),
            Arrangement::PerRecord => {
                let pages = (0..count)
                    .map(|index| PlannedPage {
                        index,
                        placements: vec![Placement {
                            instance: index,
                            page: index,
                            row: 0,
                            column: 0,
                            rect: Rect::from_size(label),
                        }],
                    })
                    .collect();
                Ok(LayoutPlan { page_size: label, label, pages })
            }
        }
    }
}

/// Sources, bindings, range and arrangement for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub range: RecordRange,
    #[serde(default)]
    pub arrangement: Arrangement,
}

impl BatchJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_range(mut self, range: RecordRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_arrangement(mut self, arrangement: Arrangement) -> Self {
        self.arrangement = arrangement;
        self
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn is_referenced(&self, id: &str) -> bool {
        self.bindings.iter().any(|b| b.source == id)
    }

    /// Attached sources that at least one binding reads from.
    pub fn referenced_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(move |s| self.is_referenced(&s.id))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read job file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid job file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid job: {0}")]
    Invalid(String),
}

/// On-disk job description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub scene: Scene,
    #[serde(flatten)]
    pub job: BatchJob,
    pub output: OutputTarget,
    /// Print the static scene this many times instead of iterating records.
    #[serde(default)]
    pub copies: Option<u32>,
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        if config.copies.is_some() && !config.job.bindings.is_empty() {
            return Err(ConfigError::Invalid("copies cannot be combined with data bindings".into()));
        }
        Ok(config)
    }

    pub fn into_parts(self) -> (BatchJob, Scene, OutputTarget) {
        (self.job, self.scene, self.output)
    }
}
