//! Measurement grid and its persistence.
pub mod grid;
pub mod storage;

pub use grid::{GridTable, ScanGrid};
