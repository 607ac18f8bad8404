//! Collaborator Capabilities
//!
//! The acquisition engine talks to two physical devices through narrow capability traits:
//!
//! - [`MotionStage`]: the X/Y/Z stage carrying the probe (a 3-D printer frame driven by
//!   G-code in the lab setup)
//! - [`Instrument`]: the receiver taking a reading at each point (spectrum analyzer level
//!   readings, or complex S-parameters from a vector network analyzer)
//!
//! Wire protocols (serial G-code, USB control transfers) live behind these traits and are
//! not part of this crate.
//!
//! # Contract
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Resolves only once the device has acknowledged the request; the engine treats every
//!   call as one blocking device round-trip
//! - Owns its own timeouts; the engine never wraps calls in a timeout
//!
//! # Example
//!
//! ```rust,ignore
//! async fn visit<S, I>(stage: &S, instrument: &I, target: Point3) -> ScanResult<Scalar>
//! where
//!     S: MotionStage,
//!     I: Instrument,
//! {
//!     stage.move_to(target, 1500.0).await?;
//!     Ok(instrument.measure(2.28e9, 1.0).await?)
//! }
//! ```

use async_trait::async_trait;

use crate::error::{InstrumentError, MotionError};
use crate::experiment::planner::Point3;
use crate::measurement_types::{Scalar, ValueKind};

/// Capability: Motion Control
///
/// Devices that position the probe in absolute stage coordinates (mm).
///
/// # Thread Safety
/// - All methods take `&self`; implementations use interior mutability for state
/// - The acquisition engine is the only caller while a scan is running
#[async_trait]
pub trait MotionStage: Send + Sync {
    /// Move all axes to the reference origin.
    ///
    /// Returns once the stage reports that homing finished.
    async fn home(&self) -> Result<(), MotionError>;

    /// Move to an absolute position at `feed_rate` (mm/min).
    ///
    /// Returns once the stage acknowledged arrival.
    async fn move_to(&self, target: Point3, feed_rate: f64) -> Result<(), MotionError>;
}

/// Capability: Point Measurement
///
/// Devices that take one scalar reading per call.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Take a reading.
    ///
    /// # Arguments
    /// * `frequency_hz` - Measurement frequency
    /// * `dwell` - Mode-specific second parameter: measurement time in seconds for
    ///   level readings, number of aggregated samples for network analyzer readings
    async fn measure(&self, frequency_hz: f64, dwell: f64) -> Result<Scalar, InstrumentError>;

    /// Whether this instrument returns real or complex readings.
    ///
    /// Fixed for the lifetime of a connection.
    fn value_kind(&self) -> ValueKind;
}
