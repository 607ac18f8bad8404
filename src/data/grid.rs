//! Coordinate-labeled measurement grid.
//!
//! A [`ScanGrid`] stores one [`Scalar`] per sample point. Rows are labeled by the sorted,
//! unique probe Y coordinates of a [`ScanPath`], columns by the sorted, unique probe X
//! coordinates. Cells start out empty ("no data") and are addressed by physical
//! coordinate, not by index.
//!
//! The grid holds values of a single [`ValueKind`]. The kind is either pinned when the
//! grid is built for a known instrument mode, or fixed by the first value written.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::experiment::planner::ScanPath;
use crate::measurement_types::{Scalar, ValueKind};

/// Absolute tolerance used when matching a coordinate against a grid label (mm).
pub const LABEL_TOLERANCE: f64 = 1e-9;

/// Measurement results keyed by probe coordinate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanGrid {
    x_labels: Vec<f64>,
    y_labels: Vec<f64>,
    /// Row-major, `y_labels.len()` rows of `x_labels.len()` cells
    cells: Vec<Option<Scalar>>,
    kind: Option<ValueKind>,
}

/// Label-indexed export of a grid, used at the persistence boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTable {
    /// Column header, ascending X (mm)
    pub x_labels: Vec<f64>,
    /// Row index, ascending Y (mm)
    pub y_labels: Vec<f64>,
    /// One row per Y label, one cell per X label
    pub rows: Vec<Vec<Option<Scalar>>>,
}

impl ScanGrid {
    /// A zero-size placeholder used before any scan has run.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocate an empty grid covering every probe position of `path`.
    pub fn from_path(path: &ScanPath) -> Self {
        let x_labels = unique_sorted(path.points().iter().map(|p| p.probe_position.x));
        let y_labels = unique_sorted(path.points().iter().map(|p| p.probe_position.y));
        let cells = vec![None; x_labels.len() * y_labels.len()];

        Self {
            x_labels,
            y_labels,
            cells,
            kind: None,
        }
    }

    /// Like [`ScanGrid::from_path`] with the value kind fixed up front.
    pub fn from_path_with_kind(path: &ScanPath, kind: ValueKind) -> Self {
        let mut grid = Self::from_path(path);
        grid.kind = Some(kind);
        grid
    }

    /// Column labels (X, ascending).
    pub fn x_labels(&self) -> &[f64] {
        &self.x_labels
    }

    /// Row labels (Y, ascending).
    pub fn y_labels(&self) -> &[f64] {
        &self.y_labels
    }

    /// Smallest column label.
    pub fn x_min(&self) -> Option<f64> {
        self.x_labels.first().copied()
    }

    /// Largest column label.
    pub fn x_max(&self) -> Option<f64> {
        self.x_labels.last().copied()
    }

    /// Smallest row label.
    pub fn y_min(&self) -> Option<f64> {
        self.y_labels.first().copied()
    }

    /// Largest row label.
    pub fn y_max(&self) -> Option<f64> {
        self.y_labels.last().copied()
    }

    /// Value kind of the grid, `None` while unpinned and empty.
    pub fn value_kind(&self) -> Option<ValueKind> {
        self.kind
    }

    /// Number of cells (rows x columns).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells, as for [`ScanGrid::empty`].
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of cells holding a value.
    pub fn filled_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Store `value` at the cell labeled (`x`, `y`).
    pub fn set(&mut self, x: f64, y: f64, value: Scalar) -> ScanResult<()> {
        let index = self.index_of(x, y)?;
        match self.kind {
            Some(expected) if expected != value.kind() => {
                return Err(ScanError::ValueKindMismatch {
                    expected,
                    found: value.kind(),
                });
            }
            Some(_) => {}
            None => self.kind = Some(value.kind()),
        }
        self.cells[index] = Some(value);
        Ok(())
    }

    /// Value at the cell labeled (`x`, `y`), `None` when no data was recorded yet.
    pub fn get(&self, x: f64, y: f64) -> ScanResult<Option<Scalar>> {
        let index = self.index_of(x, y)?;
        Ok(self.cells[index])
    }

    /// Iterate over `(x, y, value)` for every filled cell, row by row.
    pub fn filled_cells(&self) -> impl Iterator<Item = (f64, f64, Scalar)> + '_ {
        let columns = self.x_labels.len();
        self.cells.iter().enumerate().filter_map(move |(i, cell)| {
            cell.map(|value| (self.x_labels[i % columns], self.y_labels[i / columns], value))
        })
    }

    /// Export the label-indexed cell matrix.
    pub fn to_table(&self) -> GridTable {
        let columns = self.x_labels.len();
        let rows = if columns == 0 {
            vec![Vec::new(); self.y_labels.len()]
        } else {
            self.cells.chunks(columns).map(<[_]>::to_vec).collect()
        };

        GridTable {
            x_labels: self.x_labels.clone(),
            y_labels: self.y_labels.clone(),
            rows,
        }
    }

    /// Rebuild a grid from an exported table.
    ///
    /// Only the structure is checked: ascending labels, a rectangular matrix and a single
    /// value kind.
    pub fn from_table(table: GridTable) -> ScanResult<Self> {
        check_labels("x", &table.x_labels)?;
        check_labels("y", &table.y_labels)?;

        if table.rows.len() != table.y_labels.len() {
            return Err(ScanError::TableFormat(format!(
                "{} rows for {} y labels",
                table.rows.len(),
                table.y_labels.len()
            )));
        }

        let mut kind = None;
        let mut cells = Vec::with_capacity(table.x_labels.len() * table.y_labels.len());
        for (row_index, row) in table.rows.into_iter().enumerate() {
            if row.len() != table.x_labels.len() {
                return Err(ScanError::TableFormat(format!(
                    "row {} has {} cells, expected {}",
                    row_index,
                    row.len(),
                    table.x_labels.len()
                )));
            }
            for value in row.iter().flatten() {
                match kind {
                    None => kind = Some(value.kind()),
                    Some(k) if k != value.kind() => {
                        return Err(ScanError::TableFormat(
                            "table mixes real and complex values".to_string(),
                        ));
                    }
                    Some(_) => {}
                }
            }
            cells.extend(row);
        }

        Ok(Self {
            x_labels: table.x_labels,
            y_labels: table.y_labels,
            cells,
            kind,
        })
    }

    fn index_of(&self, x: f64, y: f64) -> ScanResult<usize> {
        let column = find_label(&self.x_labels, x);
        let row = find_label(&self.y_labels, y);
        match (column, row) {
            (Some(column), Some(row)) => Ok(row * self.x_labels.len() + column),
            _ => Err(ScanError::OutOfRange { x, y }),
        }
    }
}

fn unique_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(f64::total_cmp);
    values.dedup_by(|a, b| (*a - *b).abs() <= LABEL_TOLERANCE);
    values
}

fn find_label(labels: &[f64], value: f64) -> Option<usize> {
    labels
        .iter()
        .position(|label| (label - value).abs() <= LABEL_TOLERANCE)
}

fn check_labels(axis: &str, labels: &[f64]) -> ScanResult<()> {
    if let Some(bad) = labels.iter().find(|v| !v.is_finite()) {
        return Err(ScanError::TableFormat(format!(
            "{} label {} is not finite",
            axis, bad
        )));
    }
    if labels.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ScanError::TableFormat(format!(
            "{} labels are not strictly ascending",
            axis
        )));
    }
    Ok(())
}
