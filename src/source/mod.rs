//! Data Sources - uniform record access over inline tables, spreadsheets and queries
//!
//! A source is opened once per job, read by zero-based record index, and
//! closed when the job ends. "Not configured" (no descriptor) is kept apart
//! from "open failed" (descriptor present, backend unreachable).

pub mod database;
#[cfg(feature = "duckdb")]
pub mod duckdb;
pub mod inline;
pub mod spreadsheet;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use database::{DatabaseConnector, DatabaseSource, QueryRunner, ResultSet};
pub use inline::InlineTableSource;
pub use spreadsheet::{MemoryWorkbook, SheetGrid, SpreadsheetSource, Workbook, WorkbookProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    InlineTable,
    SpreadsheetFile,
    DatabaseQuery,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::InlineTable => "inline table",
            SourceKind::SpreadsheetFile => "spreadsheet file",
            SourceKind::DatabaseQuery => "database query",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("data source is not configured")]
    NotConfigured,

    #[error("invalid source descriptor: {0}")]
    Descriptor(String),

    #[error("failed to open {location}: {reason}")]
    Open { location: String, reason: String },

    #[error("row {row} has {actual} fields, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("record index {index} out of range, source has {count} records")]
    OutOfRange { index: usize, count: usize },

    #[error("query failed: {0}")]
    Query(String),
}

/// How an inline table is split into items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Newline,
    Space,
    Custom(String),
}

impl Delimiter {
    /// Split into trimmed, non-empty items.
    pub fn split(&self, text: &str) -> Vec<String> {
        let pieces: Vec<&str> = match self {
            Delimiter::Newline => text.lines().collect(),
            Delimiter::Space => text.split(' ').collect(),
            Delimiter::Custom(sep) if sep == "\\n" => text.lines().collect(),
            Delimiter::Custom(sep) if sep.is_empty() => vec![text],
            Delimiter::Custom(sep) => text.split(sep.as_str()).collect(),
        };
        pieces
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn default_header_row() -> u32 { 1 }
fn default_start_row() -> u32 { 2 }

/// Where a source's rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceDescriptor {
    #[serde(rename_all = "camelCase")]
    InlineTable {
        text: String,
        #[serde(default)]
        delimiter: Delimiter,
        /// Splits each item into fields.
        #[serde(default)]
        field_separator: Option<String>,
        /// First item holds field names.
        #[serde(default)]
        header: bool,
    },
    #[serde(rename_all = "camelCase")]
    SpreadsheetFile {
        path: PathBuf,
        #[serde(default)]
        sheet: Option<String>,
        /// 1-based, 0 = no header.
        #[serde(default = "default_header_row")]
        header_row: u32,
        /// 1-based.
        #[serde(default = "default_start_row")]
        start_row: u32,
        /// 1-based inclusive; absent or 0 = last row.
        #[serde(default)]
        end_row: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    DatabaseQuery {
        connection: String,
        table: String,
        /// Empty selects every column.
        #[serde(default)]
        columns: Vec<String>,
        /// WHERE clause fragment, without the keyword.
        #[serde(default)]
        filter: Option<String>,
    },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::InlineTable { .. } => SourceKind::InlineTable,
            SourceDescriptor::SpreadsheetFile { .. } => SourceKind::SpreadsheetFile,
            SourceDescriptor::DatabaseQuery { .. } => SourceKind::DatabaseQuery,
        }
    }

    pub fn location(&self) -> String {
        match self {
            SourceDescriptor::InlineTable { .. } => "inline table".to_string(),
            SourceDescriptor::SpreadsheetFile { path, sheet, .. } => match sheet {
                Some(sheet) => format!("{}#{}", path.display(), sheet),
                None => path.display().to_string(),
            },
            SourceDescriptor::DatabaseQuery { connection, table, .. } => format!("{}/{}", connection, table),
        }
    }
}

/// A data source attached to a job. `descriptor: None` means the user
/// enabled the source without configuring it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub descriptor: Option<SourceDescriptor>,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, descriptor: SourceDescriptor) -> Self {
        Self { id: id.into(), descriptor: Some(descriptor) }
    }

    pub fn unconfigured(id: impl Into<String>) -> Self {
        Self { id: id.into(), descriptor: None }
    }

    pub fn is_configured(&self) -> bool {
        self.descriptor.is_some()
    }
}

/// Column by zero-based position or by header name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSelector {
    Index(usize),
    Name(String),
}

impl FieldSelector {
    pub fn resolve(&self, columns: &[String]) -> Option<usize> {
        match self {
            FieldSelector::Index(i) => (*i < columns.len()).then_some(*i),
            FieldSelector::Name(name) => columns.iter().position(|c| c == name),
        }
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSelector::Index(i) => write!(f, "#{}", i),
            FieldSelector::Name(name) => write!(f, "'{}'", name),
        }
    }
}

impl From<usize> for FieldSelector {
    fn from(index: usize) -> Self {
        FieldSelector::Index(index)
    }
}

impl From<&str> for FieldSelector {
    fn from(name: &str) -> Self {
        FieldSelector::Name(name.to_string())
    }
}

/// One row of field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    columns: Arc<[String]>,
    fields: Vec<String>,
}

impl Record {
    pub fn new(columns: Arc<[String]>, fields: Vec<String>) -> Self {
        Self { columns, fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, selector: &FieldSelector) -> Option<&str> {
        selector
            .resolve(&self.columns)
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }
}

/// Column names A, B, ..., Z, AA, AB, ... for a zero-based index.
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// An opened source. Record indices are zero-based.
pub trait DataSource: Send {
    fn kind(&self) -> SourceKind;

    fn record_count(&self) -> usize;

    fn record_at(&self, index: usize) -> Result<Record, SourceError>;

    fn columns(&self) -> &[String];

    fn arity(&self) -> usize {
        self.columns().len()
    }

    /// Release backend resources. Called exactly once by the pool.
    fn close(&mut self) {}
}

/// Shared row storage for backends that load eagerly.
#[derive(Debug, Clone)]
pub(crate) struct RowTable {
    columns: Arc<[String]>,
    rows: Vec<Vec<String>>,
}

impl RowTable {
    /// Rows must already match the column count.
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, SourceError> {
        let expected = columns.len();
        if let Some((row, fields)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
            return Err(SourceError::Ragged { row: row + 1, expected, actual: fields.len() });
        }
        Ok(Self { columns: columns.into(), rows })
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn columns(&self) -> &[String] {
        &self.columns
    }

    pub(crate) fn record(&self, index: usize) -> Result<Record, SourceError> {
        self.rows
            .get(index)
            .map(|fields| Record::new(Arc::clone(&self.columns), fields.clone()))
            .ok_or(SourceError::OutOfRange { index, count: self.rows.len() })
    }
}

/// Turns a source configuration into an open handle.
pub trait SourceOpener: Send + Sync {
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn DataSource>, SourceError>;
}

/// Opens every descriptor kind, delegating files and databases to pluggable readers.
#[derive(Default, Clone)]
pub struct DefaultOpener {
    workbooks: Option<Arc<dyn WorkbookProvider>>,
    databases: Option<Arc<dyn DatabaseConnector>>,
}

impl DefaultOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workbooks(mut self, provider: Arc<dyn WorkbookProvider>) -> Self {
        self.workbooks = Some(provider);
        self
    }

    pub fn with_databases(mut self, connector: Arc<dyn DatabaseConnector>) -> Self {
        self.databases = Some(connector);
        self
    }

    /// Opener backed by DuckDB for delimited-text workbooks and database files.
    #[cfg(feature = "duckdb")]
    pub fn with_duckdb() -> Self {
        Self::new()
            .with_workbooks(Arc::new(self::duckdb::DuckDbWorkbooks))
            .with_databases(Arc::new(self::duckdb::DuckDbConnector))
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn DataSource>, SourceError> {
        let descriptor = config.descriptor.as_ref().ok_or(SourceError::NotConfigured)?;
        let unavailable = |what: &str| SourceError::Open {
            location: descriptor.location(),
            reason: format!("no {} reader available; build with the duckdb feature", what),
        };

        match descriptor {
            SourceDescriptor::InlineTable { text, delimiter, field_separator, header } => {
                let source = InlineTableSource::parse(text, delimiter, field_separator.as_deref(), *header)?;
                Ok(Box::new(source))
            }
            SourceDescriptor::SpreadsheetFile { path, sheet, header_row, start_row, end_row } => {
                let provider = self.workbooks.as_ref().ok_or_else(|| unavailable("spreadsheet"))?;
                let workbook = provider.open(path)?;
                let source = SpreadsheetSource::read(
                    workbook.as_ref(),
                    sheet.as_deref(),
                    *header_row,
                    *start_row,
                    end_row.unwrap_or(0),
                )?;
                Ok(Box::new(source))
            }
            SourceDescriptor::DatabaseQuery { connection, table, columns, filter } => {
                let connector = self.databases.as_ref().ok_or_else(|| unavailable("database"))?;
                let runner = connector.connect(connection)?;
                let source = DatabaseSource::query(runner, table, columns, filter.as_deref())?;
                Ok(Box::new(source))
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("data source '{source_id}': {error}")]
pub struct AcquireError {
    pub source_id: String,
    #[source]
    pub error: SourceError,
}

/// Handles held for the duration of one job. Dropping the pool closes them.
pub struct SourcePool {
    handles: BTreeMap<String, Box<dyn DataSource>>,
}

impl SourcePool {
    pub fn empty() -> Self {
        Self { handles: BTreeMap::new() }
    }

    /// Open each configuration once. On failure, handles opened so far are released.
    pub fn acquire<'a>(
        opener: &dyn SourceOpener,
        configs: impl IntoIterator<Item = &'a SourceConfig>,
    ) -> Result<Self, AcquireError> {
        let mut pool = Self::empty();
        for config in configs {
            if pool.handles.contains_key(&config.id) {
                continue;
            }
            let handle = opener.open(config).map_err(|error| AcquireError {
                source_id: config.id.clone(),
                error,
            })?;
            debug!(source = %config.id, kind = %handle.kind(), records = handle.record_count(), "source opened");
            pool.handles.insert(config.id.clone(), handle);
        }
        Ok(pool)
    }

    pub fn get(&self, id: &str) -> Option<&dyn DataSource> {
        self.handles.get(id).map(|h| h.as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Record count per source id.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.handles.iter().map(|(id, h)| (id.clone(), h.record_count())).collect()
    }

    pub fn release(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for (id, mut handle) in std::mem::take(&mut self.handles) {
            handle.close();
            debug!(source = %id, "source released");
        }
        info!("data source handles released");
    }
}

impl Drop for SourcePool {
    fn drop(&mut self) {
        self.release();
    }
}
