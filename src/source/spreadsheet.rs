//! Spreadsheet files: a header row plus a bounded window of data rows

use std::path::Path;

use super::{column_letters, DataSource, Record, RowTable, SourceError, SourceKind};

/// Raw cell text of one sheet. Rows may be ragged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetGrid {
    rows: Vec<Vec<String>>,
}

impl SheetGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self::new(rows.into_iter().map(|r| r.into_iter().map(Into::into).collect()).collect())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// 1-based row.
    pub fn row(&self, row: usize) -> &[String] {
        row.checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .map_or(&[][..], Vec::as_slice)
    }
}

/// An opened workbook file.
pub trait Workbook {
    fn sheet_names(&self) -> Vec<String>;

    fn sheet(&self, name: &str) -> Result<SheetGrid, SourceError>;
}

/// Opens workbook files by path.
pub trait WorkbookProvider: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn Workbook>, SourceError>;
}

/// Workbook held in memory. Also serves as a provider that ignores the path.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkbook {
    sheets: Vec<(String, SheetGrid)>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: impl Into<String>, grid: SheetGrid) -> Self {
        self.sheets.push((name.into(), grid));
        self
    }
}

impl Workbook for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(n, _)| n.clone()).collect()
    }

    fn sheet(&self, name: &str) -> Result<SheetGrid, SourceError> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, g)| g.clone())
            .ok_or_else(|| SourceError::Open {
                location: name.to_string(),
                reason: "sheet not found".to_string(),
            })
    }
}

impl WorkbookProvider for MemoryWorkbook {
    fn open(&self, _path: &Path) -> Result<Box<dyn Workbook>, SourceError> {
        Ok(Box::new(self.clone()))
    }
}

/// Resolved 1-based inclusive row window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWindow {
    pub header: Option<usize>,
    pub start: usize,
    pub end: usize,
}

impl RowWindow {
    /// Clamp user bounds against a sheet of `row_count` rows. The start row
    /// always lands after the header; an end of 0 means the last row.
    pub fn resolve(header_row: u32, start_row: u32, end_row: u32, row_count: usize) -> Self {
        let header = (header_row > 0).then_some(header_row as usize);
        let mut start = start_row.max(1) as usize;
        if let Some(h) = header {
            if start <= h {
                start = h + 1;
            }
        }
        let end = match end_row as usize {
            0 => row_count,
            e => e.min(row_count),
        };
        Self { header, start, end }
    }

    pub fn rows(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

#[derive(Debug, Clone)]
pub struct SpreadsheetSource {
    sheet: String,
    table: RowTable,
}

impl SpreadsheetSource {
    pub fn read(
        workbook: &dyn Workbook,
        sheet: Option<&str>,
        header_row: u32,
        start_row: u32,
        end_row: u32,
    ) -> Result<Self, SourceError> {
        let sheet_name = match sheet {
            Some(name) => name.to_string(),
            None => workbook.sheet_names().into_iter().next().ok_or_else(|| SourceError::Open {
                location: "workbook".to_string(),
                reason: "workbook has no sheets".to_string(),
            })?,
        };
        let grid = workbook.sheet(&sheet_name)?;
        let window = RowWindow::resolve(header_row, start_row, end_row, grid.row_count());

        if let Some(h) = window.header {
            if h > grid.row_count() && grid.row_count() > 0 {
                return Err(SourceError::Descriptor(format!(
                    "header row {} is beyond the last row {} of sheet '{}'",
                    h,
                    grid.row_count(),
                    sheet_name
                )));
            }
        }

        let header_cells = window.header.map_or(&[][..], |h| grid.row(h));
        let width = window
            .rows()
            .map(|r| grid.row(r).len())
            .chain(std::iter::once(header_cells.len()))
            .max()
            .unwrap_or(0);

        let columns: Vec<String> = (0..width)
            .map(|c| match header_cells.get(c).map(|s| s.trim()) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => column_letters(c),
            })
            .collect();

        let rows: Vec<Vec<String>> = window
            .rows()
            .map(|r| {
                let cells = grid.row(r);
                (0..width)
                    .map(|c| cells.get(c).map_or(String::new(), |s| s.trim().to_string()))
                    .collect::<Vec<_>>()
            })
            .filter(|cells| cells.iter().any(|c| !c.is_empty()))
            .collect();

        Ok(Self {
            sheet: sheet_name,
            table: RowTable::new(columns, rows)?,
        })
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }
}

impl DataSource for SpreadsheetSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SpreadsheetFile
    }

    fn record_count(&self) -> usize {
        self.table.len()
    }

    fn record_at(&self, index: usize) -> Result<Record, SourceError> {
        self.table.record(index)
    }

    fn columns(&self) -> &[String] {
        self.table.columns()
    }
}
