//! Custom error types for the scan engine.
//!
//! This module defines the crate-wide error type, `ScanError`, together with the two
//! collaborator error types, `MotionError` and `InstrumentError`, returned by the motion
//! stage and measurement instrument drivers.
//!
//! ## Error Hierarchy
//!
//! - **`ConfigIncomplete`** / **`Config`**: a required configuration key is missing, or the
//!   configuration file could not be parsed. Detected before any device I/O.
//! - **`InvalidGeometry`** / **`EmptyPath`**: the scan geometry cannot produce a usable path.
//! - **`AlreadyRunning`**: a second acquisition was requested against devices that are
//!   already owned by a running acquisition.
//! - **`Motion`** / **`Instrument`**: device-call failures. Inside a running acquisition these
//!   are converted into a terminal `Failed` event by the sequencer instead of being
//!   propagated out of the worker.
//! - **`OutOfRange`** / **`ValueKindMismatch`** / **`TableFormat`**: grid access and tabular
//!   import problems.
//!
//! By using `#[from]`, `ScanError` can be created from the collaborator errors and from
//! I/O errors with the `?` operator.

use std::fmt;
use thiserror::Error;

use crate::measurement_types::ValueKind;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Required configuration keys are absent
    #[error("Configuration incomplete, missing keys: {}", missing.join(", "))]
    ConfigIncomplete {
        /// Dotted key names, e.g. `stage.feed_rate`
        missing: Vec<String>,
    },

    /// Configuration could not be loaded or extracted
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration value out of range
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Geometry the planner cannot lay out
    #[error("Invalid scan geometry: {0}")]
    InvalidGeometry(String),

    /// Every planned point lies outside the stage travel
    #[error("Scan geometry produces no in-bounds sample points")]
    EmptyPath,

    /// Devices are owned by another acquisition
    #[error("An acquisition is already running on these devices")]
    AlreadyRunning,

    /// Worker task could not be spawned, panicked or was aborted
    #[error("Acquisition worker terminated abnormally: {0}")]
    Worker(String),

    /// Coordinate without a grid cell
    #[error("Coordinate ({x}, {y}) is not a label of the scan grid")]
    OutOfRange {
        /// Requested column
        x: f64,
        /// Requested row
        y: f64,
    },

    /// Real value written to a complex grid or vice versa
    #[error("Cannot store a {found} value in a {expected} grid")]
    ValueKindMismatch {
        /// Kind of the grid
        expected: ValueKind,
        /// Kind of the rejected value
        found: ValueKind,
    },

    /// Imported table does not describe a grid
    #[error("Malformed grid table: {0}")]
    TableFormat(String),

    /// Motion stage failure
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Instrument failure
    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    /// File access failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failure
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Operation needs a disabled cargo feature
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for ScanError {
    fn from(value: figment::Error) -> Self {
        ScanError::Config(Box::new(value))
    }
}

/// Category of a device failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// Link to the device lost or garbled
    Communication,
    /// Device reported a fault
    Hardware,
    /// No answer in time
    Timeout,
    /// Device rejected a command argument
    InvalidParameter,
}

impl fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceErrorKind::Communication => "communication",
            DeviceErrorKind::Hardware => "hardware",
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a motion stage driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Motion {kind} error: {message}")]
pub struct MotionError {
    /// Failure category
    pub kind: DeviceErrorKind,
    /// Message from the stage driver
    pub message: String,
}

impl MotionError {
    /// Error of `kind` with a driver message.
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Failure reported by a measurement instrument driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Instrument {kind} error: {message}")]
pub struct InstrumentError {
    /// Failure category
    pub kind: DeviceErrorKind,
    /// Message from the instrument driver
    pub message: String,
}

impl InstrumentError {
    /// Error of `kind` with a driver message.
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
