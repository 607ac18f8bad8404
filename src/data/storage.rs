//! CSV persistence for scan grids.
//!
//! Layout of a persisted grid:
//!
//! ```text
//! y\x,31.5,34.5,37.5
//! 31.5,-20.113,-19.872,
//! 34.5,-21.004,-20.5,-20.75
//! 37.5,1.5+0.25j,...
//! ```
//!
//! - the header holds the X labels (mm, ascending) after a corner cell,
//! - every following record starts with its Y label (mm, ascending),
//! - a cell is the raw (unrounded) measurement in the text format of
//!   [`Scalar`](crate::measurement_types::Scalar); complex values are written as `a+bj`,
//! - an empty cell means no data.
//!
//! Values are written with the shortest round-trip float representation, so
//! `read_grid_csv(write_grid_csv(grid))` reproduces the grid exactly.

#[cfg(feature = "storage_csv")]
use std::io::{Read, Write};
use std::path::Path;

use crate::data::grid::ScanGrid;
use crate::error::{ScanError, ScanResult};
#[cfg(feature = "storage_csv")]
use crate::{data::grid::GridTable, measurement_types::Scalar};

/// Text of the top-left header cell.
pub const CORNER_LABEL: &str = "y\\x";

/// Write `grid` as CSV to any writer.
#[cfg(feature = "storage_csv")]
pub fn write_grid<W: Write>(grid: &ScanGrid, writer: W) -> ScanResult<()> {
    let table = grid.to_table();
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(table.x_labels.len() + 1);
    header.push(CORNER_LABEL.to_string());
    header.extend(table.x_labels.iter().map(|x| x.to_string()));
    csv_writer.write_record(&header)?;

    for (y, row) in table.y_labels.iter().zip(&table.rows) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(y.to_string());
        record.extend(
            row.iter()
                .map(|cell| cell.map_or(String::new(), |value| value.to_string())),
        );
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Read a grid previously written by [`write_grid`].
#[cfg(feature = "storage_csv")]
pub fn read_grid<R: Read>(reader: R) -> ScanResult<ScanGrid> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header = csv_reader.headers()?.clone();
    let x_labels = header
        .iter()
        .skip(1)
        .map(|field| parse_label("x", field))
        .collect::<ScanResult<Vec<f64>>>()?;

    let mut y_labels = Vec::new();
    let mut rows = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        let mut fields = record.iter();
        let y_field = fields
            .next()
            .ok_or_else(|| ScanError::TableFormat(format!("record {} is empty", line + 1)))?;
        y_labels.push(parse_label("y", y_field)?);

        let row = fields
            .map(|field| {
                let field = field.trim();
                if field.is_empty() {
                    Ok(None)
                } else {
                    field
                        .parse::<Scalar>()
                        .map(Some)
                        .map_err(|e| ScanError::TableFormat(format!("record {}: {}", line + 1, e)))
                }
            })
            .collect::<ScanResult<Vec<_>>>()?;
        rows.push(row);
    }

    ScanGrid::from_table(GridTable {
        x_labels,
        y_labels,
        rows,
    })
}

/// Write `grid` to a CSV file, creating parent directories as needed.
pub fn write_grid_csv(grid: &ScanGrid, path: impl AsRef<Path>) -> ScanResult<()> {
    #[cfg(not(feature = "storage_csv"))]
    {
        let _ = (grid, path);
        return Err(ScanError::FeatureNotEnabled("storage_csv".to_string()));
    }

    #[cfg(feature = "storage_csv")]
    {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        write_grid(grid, std::io::BufWriter::new(file))?;
        tracing::info!(
            path = %path.display(),
            cells = grid.len(),
            filled = grid.filled_count(),
            "Wrote scan grid"
        );
        Ok(())
    }
}

/// Load a grid from a CSV file written by [`write_grid_csv`].
pub fn read_grid_csv(path: impl AsRef<Path>) -> ScanResult<ScanGrid> {
    #[cfg(not(feature = "storage_csv"))]
    {
        let _ = path;
        return Err(ScanError::FeatureNotEnabled("storage_csv".to_string()));
    }

    #[cfg(feature = "storage_csv")]
    {
        let file = std::fs::File::open(path.as_ref())?;
        read_grid(std::io::BufReader::new(file))
    }
}

#[cfg(feature = "storage_csv")]
fn parse_label(axis: &str, field: &str) -> ScanResult<f64> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| ScanError::TableFormat(format!("invalid {} label '{}'", axis, field)))
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;

    fn sample_grid(values: [[Option<Scalar>; 2]; 2]) -> ScanGrid {
        ScanGrid::from_table(GridTable {
            x_labels: vec![1.5, 4.5],
            y_labels: vec![1.5, 4.5],
            rows: values.iter().map(|r| r.to_vec()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_csv_layout() {
        let grid = sample_grid([
            [Some(Scalar::Real(-20.25)), None],
            [Some(Scalar::Real(0.1 + 0.2)), Some(Scalar::Real(3.0))],
        ]);

        let mut buffer = Vec::new();
        write_grid(&grid, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert_eq!(
            text,
            "y\\x,1.5,4.5\n1.5,-20.25,\n4.5,0.30000000000000004,3\n"
        );
    }

    #[test]
    fn test_complex_cells_round_trip_exactly() {
        let grid = sample_grid([
            [Some(Scalar::complex(0.125, -0.5)), None],
            [None, Some(Scalar::complex(1.0 / 3.0, 2.0 / 3.0))],
        ]);

        let mut buffer = Vec::new();
        write_grid(&grid, &mut buffer).unwrap();
        let restored = read_grid(buffer.as_slice()).unwrap();

        assert_eq!(restored, grid);
    }

    #[test]
    fn test_read_accepts_parenthesised_complex() {
        let text = "y\\x,1.5\n1.5,(1+2j)\n";
        let grid = read_grid(text.as_bytes()).unwrap();
        assert_eq!(grid.get(1.5, 1.5).unwrap(), Some(Scalar::complex(1.0, 2.0)));
    }

    #[test]
    fn test_read_rejects_garbage_cells() {
        let text = "y\\x,1.5\n1.5,not-a-number\n";
        assert!(matches!(
            read_grid(text.as_bytes()),
            Err(ScanError::TableFormat(_))
        ));
    }
}
