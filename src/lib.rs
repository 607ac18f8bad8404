//! # Near-field Scan Core Library
//!
//! Planning and acquisition engine for a constant-height scanning probe. A probe mounted on
//! an X/Y/Z stage is walked over a rectangular sample in a serpentine pattern, a reading is
//! taken at every sample point, and the readings are collected in a grid labeled by
//! physical coordinate.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based configuration with one typed group per collaborator
//!   (stage, instrument, path, progress).
//! - **`data`**: the coordinate-labeled `ScanGrid` and its CSV persistence.
//! - **`error`**: the crate-wide `ScanError` and the collaborator error types.
//! - **`experiment`**: the path planner and the `AcquisitionSequencer` state machine.
//! - **`hardware`**: the `MotionStage` / `Instrument` capability traits and mock devices.
//! - **`logging`**: tracing subscriber setup.
//! - **`measurement_types`**: real/complex `Scalar` readings and their text format.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod measurement_types;

pub use error::{ScanError, ScanResult};
