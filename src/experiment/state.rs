//! Acquisition state, events and outcome.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::grid::ScanGrid;
use crate::error::ScanError;
use crate::experiment::summary::ScanSummary;
use crate::measurement_types::Scalar;

/// Sequencer lifecycle state.
///
/// # State Machine
///
/// ```text
/// Idle ──start──> Homing ──> TracingBoundary ──> Scanning(0..N) ──> Draining ──> Completed
///                   │              │                   │                │
///                   └──────────────┴─── cancel ────────┴────────────────┴──> Cancelled
///                   │              │                   │                │
///                   └──────────────┴─── device error ──┴────────────────┴──> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    /// No acquisition running
    Idle,
    /// Stage is moving to its reference origin
    Homing,
    /// Stage traces the outline of the actuator path
    TracingBoundary,
    /// Visiting sample point `index` (0-based)
    Scanning {
        /// Current sample point
        index: usize,
    },
    /// Returning to the park position after the last point
    Draining,
    /// All points measured
    Completed,
    /// Stopped on request
    Cancelled,
    /// Stopped by a device error
    Failed,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "Idle"),
            SequencerState::Homing => write!(f, "Homing"),
            SequencerState::TracingBoundary => write!(f, "TracingBoundary"),
            SequencerState::Scanning { index } => write!(f, "Scanning({})", index),
            SequencerState::Draining => write!(f, "Draining"),
            SequencerState::Completed => write!(f, "Completed"),
            SequencerState::Cancelled => write!(f, "Cancelled"),
            SequencerState::Failed => write!(f, "Failed"),
        }
    }
}

impl SequencerState {
    /// Whether the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequencerState::Completed | SequencerState::Cancelled | SequencerState::Failed
        )
    }
}

/// Event published by a running acquisition.
///
/// Every run publishes exactly one terminal event, either `Completed` or `Failed`, and
/// nothing after it.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// State transition
    State(SequencerState),
    /// Number of completed sample points; 0 when the run starts, N after the last point
    Progress(usize),
    /// Time estimate, published with every `Progress`
    Summary(ScanSummary),
    /// Latest reading, rounded for display
    LastMeasurement(Scalar),
    /// Copy of the grid after a write
    GridUpdated(Arc<ScanGrid>),
    /// Finished or cancelled; carries the (possibly partial) grid
    Completed {
        /// Final grid
        grid: Arc<ScanGrid>,
        /// Whether the run stopped on a cancellation request
        cancelled: bool,
    },
    /// Stopped by a device error
    Failed {
        /// Error message
        error: String,
        /// Index of the last fully measured point
        last_completed_index: Option<usize>,
        /// Partial grid
        grid: Arc<ScanGrid>,
    },
}

impl ScanEvent {
    /// Whether this is the final event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Completed { .. } | ScanEvent::Failed { .. })
    }
}

/// Result of a finished acquisition, returned by `ScanHandle::join`.
#[derive(Debug)]
pub enum ScanOutcome {
    /// All points measured, or stopped on request
    Completed {
        /// Final grid
        grid: ScanGrid,
        /// Whether the run stopped on a cancellation request
        cancelled: bool,
    },
    /// Stopped by a device error
    Failed {
        /// The device error
        error: ScanError,
        /// Index of the last fully measured point
        last_completed_index: Option<usize>,
        /// Partial grid
        grid: ScanGrid,
    },
}

impl ScanOutcome {
    /// The final grid.
    pub fn grid(&self) -> &ScanGrid {
        match self {
            ScanOutcome::Completed { grid, .. } | ScanOutcome::Failed { grid, .. } => grid,
        }
    }

    /// Take the final grid.
    pub fn into_grid(self) -> ScanGrid {
        match self {
            ScanOutcome::Completed { grid, .. } | ScanOutcome::Failed { grid, .. } => grid,
        }
    }

    /// Whether the run stopped on a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanOutcome::Completed { cancelled: true, .. })
    }

    /// Whether the run stopped on a device error.
    pub fn is_failed(&self) -> bool {
        matches!(self, ScanOutcome::Failed { .. })
    }

    /// Terminal state corresponding to this outcome.
    pub fn state(&self) -> SequencerState {
        match self {
            ScanOutcome::Completed { cancelled: false, .. } => SequencerState::Completed,
            ScanOutcome::Completed { cancelled: true, .. } => SequencerState::Cancelled,
            ScanOutcome::Failed { .. } => SequencerState::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SequencerState::Scanning { index: 4 }.to_string(), "Scanning(4)");
        assert_eq!(SequencerState::TracingBoundary.to_string(), "TracingBoundary");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SequencerState::Idle.is_terminal());
        assert!(SequencerState::Failed.is_terminal());
        assert!(!SequencerState::Homing.is_terminal());
        assert!(!SequencerState::Scanning { index: 0 }.is_terminal());
        assert!(SequencerState::Cancelled.is_terminal());
    }

    #[test]
    fn test_outcome_state() {
        let cancelled = ScanOutcome::Completed {
            grid: ScanGrid::empty(),
            cancelled: true,
        };
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.state(), SequencerState::Cancelled);

        let failed = ScanOutcome::Failed {
            error: ScanError::EmptyPath,
            last_completed_index: None,
            grid: ScanGrid::empty(),
        };
        assert!(failed.is_failed());
        assert_eq!(failed.state(), SequencerState::Failed);
        assert!(failed.into_grid().is_empty());
    }
}
