//! Hardware abstraction layer.
//!
//! - `capabilities`: the motion stage and instrument traits the sequencer drives
//! - `mock`: simulated implementations for tests and dry runs

pub mod capabilities;
pub mod mock;

pub use capabilities::{Instrument, MotionStage};
