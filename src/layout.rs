//! Layout/Tiling Engine - arranges label instances into a grid per page
//!
//! Cells are addressed by zero-based (row, column). The first page skips
//! every cell before the configured starting cell in reading order, so the
//! set of usable cells does not depend on the fill order; the fill order
//! only decides the sequence in which instances occupy them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::{Rect, Size};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("grid must have at least one cell, got {rows}x{columns}")]
    EmptyGrid { rows: u32, columns: u32 },

    #[error("starting cell ({row}, {column}) lies outside a {rows}x{columns} grid")]
    OffsetOutOfRange {
        row: u32,
        column: u32,
        rows: u32,
        columns: u32,
    },

    #[error("invalid geometry: {0}")]
    Geometry(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillOrder {
    /// Row-major.
    #[default]
    Horizontal,
    /// Column-major.
    Vertical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub right: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub bottom: f64,
}

impl Margins {
    pub const fn uniform(value: f64) -> Self {
        Self { left: value, right: value, top: value, bottom: value }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    #[default]
    A4,
    A5,
    Letter,
    Custom { width: f64, height: f64 },
}

impl PaperSize {
    /// Portrait dimensions in millimetres.
    pub fn portrait(self) -> Size {
        match self {
            PaperSize::A4 => Size::new(210.0, 297.0),
            PaperSize::A5 => Size::new(148.0, 210.0),
            PaperSize::Letter => Size::new(216.0, 279.0),
            PaperSize::Custom { width, height } => Size::new(width, height),
        }
    }

    pub fn size(self, orientation: Orientation) -> Size {
        let s = self.portrait();
        match orientation {
            Orientation::Portrait => s,
            Orientation::Landscape => Size::new(s.height, s.width),
        }
    }
}

fn default_one() -> u32 { 1 }

/// Grid geometry for multi-up output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutGrid {
    #[serde(default = "default_one")]
    pub rows: u32,
    #[serde(default = "default_one")]
    pub columns: u32,
    #[serde(default)]
    pub paper: PaperSize,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub margins: Margins,
    #[serde(default)]
    pub h_spacing: f64,
    #[serde(default)]
    pub v_spacing: f64,
    /// Zero-based first-page offset.
    #[serde(default)]
    pub start_row: u32,
    #[serde(default)]
    pub start_column: u32,
    #[serde(default)]
    pub fill_order: FillOrder,
}

impl LayoutGrid {
    pub fn new(rows: u32, columns: u32, paper: PaperSize) -> Result<Self, LayoutError> {
        let grid = Self {
            rows,
            columns,
            paper,
            orientation: Orientation::Portrait,
            margins: Margins::default(),
            h_spacing: 0.0,
            v_spacing: 0.0,
            start_row: 0,
            start_column: 0,
            fill_order: FillOrder::Horizontal,
        };
        grid.check()?;
        Ok(grid)
    }

    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    pub fn with_spacing(mut self, horizontal: f64, vertical: f64) -> Self {
        self.h_spacing = horizontal;
        self.v_spacing = vertical;
        self
    }

    pub fn with_fill_order(mut self, fill_order: FillOrder) -> Self {
        self.fill_order = fill_order;
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_start(mut self, row: u32, column: u32) -> Result<Self, LayoutError> {
        self.start_row = row;
        self.start_column = column;
        self.check()?;
        Ok(self)
    }

    pub fn page_size(&self) -> Size {
        self.paper.size(self.orientation)
    }

    pub fn inner_size(&self) -> Size {
        let page = self.page_size();
        Size::new(
            page.width - self.margins.left - self.margins.right,
            page.height - self.margins.top - self.margins.bottom,
        )
    }

    pub fn capacity(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    pub fn check(&self) -> Result<(), LayoutError> {
        if self.rows == 0 || self.columns == 0 {
            return Err(LayoutError::EmptyGrid { rows: self.rows, columns: self.columns });
        }
        if self.start_row >= self.rows || self.start_column >= self.columns {
            return Err(LayoutError::OffsetOutOfRange {
                row: self.start_row,
                column: self.start_column,
                rows: self.rows,
                columns: self.columns,
            });
        }
        if !self.page_size().is_positive() {
            return Err(LayoutError::Geometry("page size must be positive".into()));
        }
        if self.h_spacing < 0.0 || self.v_spacing < 0.0 {
            return Err(LayoutError::Geometry("spacing must not be negative".into()));
        }
        if !self.inner_size().is_positive() {
            return Err(LayoutError::Geometry("margins leave no printable area".into()));
        }
        Ok(())
    }

    /// Largest (rows, columns) that fit `label` inside the margins, at least 1x1.
    pub fn max_fit(&self, label: Size) -> (u32, u32) {
        let inner = self.inner_size();
        let fit = |space: f64, item: f64, gap: f64| -> u32 {
            if item + gap <= 0.0 {
                return 1;
            }
            ((space + gap) / (item + gap)).floor().max(1.0) as u32
        };
        (
            fit(inner.height, label.height, self.v_spacing),
            fit(inner.width, label.width, self.h_spacing),
        )
    }

    /// Copy with rows/columns clamped to what fits and the start cell kept inside.
    pub fn fitted(&self, label: Size) -> Self {
        let (max_rows, max_cols) = self.max_fit(label);
        let mut grid = self.clone();
        grid.rows = grid.rows.min(max_rows).max(1);
        grid.columns = grid.columns.min(max_cols).max(1);
        grid.start_row = grid.start_row.min(grid.rows - 1);
        grid.start_column = grid.start_column.min(grid.columns - 1);
        grid
    }

    /// Top-left corner of a cell in page millimetres.
    pub fn cell_origin(&self, label: Size, row: u32, column: u32) -> (f64, f64) {
        (
            self.margins.left + column as f64 * (label.width + self.h_spacing),
            self.margins.top + row as f64 * (label.height + self.v_spacing),
        )
    }

    fn cells_in_fill_order(&self) -> Vec<(u32, u32)> {
        match self.fill_order {
            FillOrder::Horizontal => (0..self.rows)
                .flat_map(|r| (0..self.columns).map(move |c| (r, c)))
                .collect(),
            FillOrder::Vertical => (0..self.columns)
                .flat_map(|c| (0..self.rows).map(move |r| (r, c)))
                .collect(),
        }
    }

    /// Usable cells of a page, in fill order.
    pub fn page_cells(&self, first_page: bool) -> Vec<(u32, u32)> {
        let cells = self.cells_in_fill_order();
        if !first_page {
            return cells;
        }
        let start = (self.start_row, self.start_column);
        cells.into_iter().filter(|&cell| cell >= start).collect()
    }

    /// Place `count` instances of a `label`-sized item.
    pub fn plan(&self, label: Size, count: usize) -> Result<LayoutPlan, LayoutError> {
        self.check()?;
        if !label.is_positive() {
            return Err(LayoutError::Geometry("label size must be positive".into()));
        }

        let first = self.page_cells(true);
        let rest = self.page_cells(false);
        let mut pages = Vec::new();
        let mut instance = 0;

        while instance < count {
            let index = pages.len();
            let cells = if index == 0 { &first } else { &rest };
            let placements = cells
                .iter()
                .take(count - instance)
                .enumerate()
                .map(|(i, &(row, column))| {
                    let (x, y) = self.cell_origin(label, row, column);
                    Placement {
                        instance: instance + i,
                        page: index,
                        row,
                        column,
                        rect: Rect::new(x, y, label.width, label.height),
                    }
                })
                .collect::<Vec<_>>();
            instance += placements.len();
            pages.push(PlannedPage { index, placements });
        }

        Ok(LayoutPlan {
            page_size: self.page_size(),
            label,
            pages,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    /// Zero-based instance number.
    pub instance: usize,
    pub page: usize,
    pub row: u32,
    pub column: u32,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedPage {
    pub index: usize,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutPlan {
    pub page_size: Size,
    pub label: Size,
    pub pages: Vec<PlannedPage>,
}

impl LayoutPlan {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn placements(&self) -> impl Iterator<Item = &Placement> {
        self.pages.iter().flat_map(|p| p.placements.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn grid3x3() -> LayoutGrid {
        LayoutGrid::new(3, 3, PaperSize::A4)
            .unwrap()
            .with_margins(Margins::uniform(10.0))
            .with_spacing(2.0, 3.0)
    }

    const LABEL: Size = Size::new(60.0, 40.0);

    #[test]
    fn test_rejects_empty_grid_and_bad_offset() {
        assert_eq!(
            LayoutGrid::new(0, 2, PaperSize::A4).unwrap_err(),
            LayoutError::EmptyGrid { rows: 0, columns: 2 }
        );
        assert!(matches!(grid3x3().with_start(3, 0), Err(LayoutError::OffsetOutOfRange { .. })));
        assert!(matches!(grid3x3().with_start(0, 3), Err(LayoutError::OffsetOutOfRange { .. })));
    }

    #[test]
    fn test_cell_origin() {
        let grid = grid3x3();
        assert_eq!(grid.cell_origin(LABEL, 0, 0), (10.0, 10.0));
        assert_eq!(grid.cell_origin(LABEL, 2, 1), (10.0 + 62.0, 10.0 + 2.0 * 43.0));
    }

    #[test]
    fn test_starting_offset_limits_first_page() {
        let grid = grid3x3().with_start(1, 0).unwrap();
        let plan = grid.plan(LABEL, 20).unwrap();
        assert_eq!(plan.pages[0].placements.len(), 6);
        assert_eq!(plan.pages[1].placements.len(), 9);
        assert_eq!(plan.pages[2].placements.len(), 5);
        assert!(plan.pages[0].placements.iter().all(|p| p.row >= 1));
    }

    #[test]
    fn test_offset_mid_row() {
        let grid = grid3x3().with_start(0, 2).unwrap();
        let cells = grid.page_cells(true);
        assert_eq!(cells.len(), 7);
        assert_eq!(cells[0], (0, 2));
    }

    #[test]
    fn test_fill_order_changes_sequence_not_cells() {
        let horizontal = grid3x3().with_start(1, 0).unwrap();
        let vertical = horizontal.clone().with_fill_order(FillOrder::Vertical);
        let h = horizontal.plan(LABEL, 15).unwrap();
        let v = vertical.plan(LABEL, 15).unwrap();

        let cells = |plan: &LayoutPlan| -> BTreeSet<(usize, u32, u32)> {
            plan.placements().map(|p| (p.page, p.row, p.column)).collect()
        };
        assert_eq!(cells(&h), cells(&v));

        let seq = |plan: &LayoutPlan| -> Vec<(u32, u32)> {
            plan.pages[0].placements.iter().map(|p| (p.row, p.column)).collect()
        };
        assert_eq!(seq(&h), vec![(1, 0), (1, 1), (1, 2), (2, 0), (2, 1), (2, 2)]);
        assert_eq!(seq(&v), vec![(1, 0), (2, 0), (1, 1), (2, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let grid = grid3x3().with_start(2, 1).unwrap();
        assert_eq!(grid.plan(LABEL, 11).unwrap(), grid.plan(LABEL, 11).unwrap());
    }

    #[test]
    fn test_zero_instances_plans_no_pages() {
        assert_eq!(grid3x3().plan(LABEL, 0).unwrap().page_count(), 0);
    }

    #[test]
    fn test_max_fit_and_fitted() {
        // A4 inner 190x277: columns (190+2)/(60+2)=3.09, rows (277+3)/(40+3)=6.5
        let grid = grid3x3();
        assert_eq!(grid.max_fit(LABEL), (6, 3));

        let wide = LayoutGrid::new(4, 5, PaperSize::A4)
            .unwrap()
            .with_margins(Margins::uniform(10.0))
            .with_spacing(2.0, 3.0)
            .with_start(3, 4)
            .unwrap();
        let fitted = wide.fitted(LABEL);
        assert_eq!((fitted.rows, fitted.columns), (4, 3));
        assert_eq!((fitted.start_row, fitted.start_column), (3, 2));

        // An oversized label still gets one cell.
        assert_eq!(grid.max_fit(Size::new(500.0, 500.0)), (1, 1));
    }

    #[test]
    fn test_landscape_swaps_dimensions() {
        assert_eq!(PaperSize::Letter.size(Orientation::Landscape), Size::new(279.0, 216.0));
        assert_eq!(PaperSize::A5.size(Orientation::Portrait), Size::new(148.0, 210.0));
    }
}
