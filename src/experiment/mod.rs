//! Scan planning and acquisition.
//!
//! - [`planner`]: pure path planning from a [`ScanGeometry`](planner::ScanGeometry)
//! - [`run_engine`]: the [`AcquisitionSequencer`] running a planned path against hardware
//! - [`state`]: sequencer states, published events and run outcomes
//! - [`summary`]: scan time estimate and progress summary
//! - [`safety`]: cooperative cancellation and exclusive device ownership

pub mod planner;
pub mod run_engine;
pub mod safety;
pub mod state;
pub mod summary;

pub use planner::{plan, Point3, SamplePoint, ScanArea, ScanGeometry, ScanPath};
pub use run_engine::{AcquisitionSequencer, ScanHandle};
pub use state::{ScanEvent, ScanOutcome, SequencerState};
pub use summary::{format_duration, ScanSummary};
