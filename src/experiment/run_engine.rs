//! AcquisitionSequencer - state machine driving one scan
//!
//! The sequencer takes a planned path and runs it against a motion stage and an
//! instrument on a dedicated tokio task. Callers start a run, may cancel it, and observe
//! it through broadcast events; they never block on the worker.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ start() ┌────────┐   ┌─────────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Idle │────────▶│ Homing │──▶│ TracingBoundary │──▶│ Scanning(i) │──▶│ Draining │──▶ Completed
//! └──────┘         └────────┘   └─────────────────┘   └─────────────┘   └──────────┘
//!                       │ cancel() / device error, checked before every device call
//!                       └──────────────────────────────────────────────▶ Cancelled / Failed
//! ```
//!
//! # Run sequence
//!
//! 1. `Progress(0)`, then home the stage.
//! 2. Trace the outline of the actuator path at the boundary clearance height.
//! 3. For every point: move the stage, measure, store the raw value in the grid at the
//!    probe coordinate, publish `Progress(i + 1)`, the rounded reading and a grid copy.
//! 4. Park at `(0, 0, pass_height)` and publish `Completed`.
//!
//! A cancellation request is honoured at the next check: the run publishes `Completed`
//! with the partially filled grid and leaves the stage where it is. A device error ends
//! the run with `Failed`; nothing is retried. A panic inside a collaborator is caught at
//! the worker boundary and reported as `Failed` as well.
//!
//! The terminal state and event are published before the devices are released, so
//! `is_running()` only turns false once observers have seen the end of the run.
//!
//! # Usage
//!
//! ```rust,ignore
//! let sequencer = AcquisitionSequencer::new(stage, instrument);
//! let mut events = sequencer.subscribe();
//!
//! let handle = sequencer.start(config.scan.geometry()?, &config.scan)?;
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ScanEvent::Progress(n) => println!("{} points done", n),
//!         event if event.is_terminal() => break,
//!         _ => {}
//!     }
//! }
//! let grid = handle.join().await?.into_grid();
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument as _};
use uuid::Uuid;

use super::planner::{plan, Point3, ScanGeometry, ScanPath};
use super::safety::{CancellationFlag, DeviceLock};
use super::state::{ScanEvent, ScanOutcome, SequencerState};
use super::summary::ScanSummary;
use crate::config::{ResolvedScanConfig, ScanConfig};
use crate::data::grid::ScanGrid;
use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::{Instrument, MotionStage};
use crate::measurement_types::Scalar;

/// Capacity of the event channel; slow subscribers lag beyond this.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Height above the pass height at which the boundary is traced (mm).
pub const BOUNDARY_CLEARANCE_MM: f64 = 5.0;

/// Runs acquisitions against one motion stage and one instrument.
///
/// At most one acquisition runs at a time; `start` rejects a second one with
/// [`ScanError::AlreadyRunning`].
pub struct AcquisitionSequencer {
    motion: Arc<dyn MotionStage>,
    instrument: Arc<dyn Instrument>,
    event_tx: broadcast::Sender<ScanEvent>,
    state_tx: Arc<watch::Sender<SequencerState>>,
    devices: DeviceLock,
    active_cancel: Mutex<Option<CancellationFlag>>,
}

impl AcquisitionSequencer {
    /// Create a sequencer for a stage/instrument pair.
    pub fn new(motion: Arc<dyn MotionStage>, instrument: Arc<dyn Instrument>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(SequencerState::Idle);
        Self {
            motion,
            instrument,
            event_tx,
            state_tx: Arc::new(state_tx),
            devices: DeviceLock::new(),
            active_cancel: Mutex::new(None),
        }
    }

    /// Subscribe to events of all future runs.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SequencerState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SequencerState> {
        self.state_tx.subscribe()
    }

    /// Whether an acquisition currently owns the devices.
    pub fn is_running(&self) -> bool {
        self.devices.is_busy()
    }

    /// Start an acquisition and return immediately.
    ///
    /// Configuration and geometry are checked before anything is spawned:
    /// - [`ScanError::ConfigIncomplete`] when a required key of any group is missing
    /// - [`ScanError::InvalidGeometry`] when the planner rejects `geometry`
    /// - [`ScanError::EmptyPath`] when no sample point lies within the stage travel
    /// - [`ScanError::AlreadyRunning`] while a previous run still owns the devices
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, geometry: ScanGeometry, config: &ScanConfig) -> ScanResult<ScanHandle> {
        let settings = config.resolve()?;
        let path = plan(&geometry)?;
        if path.is_empty() {
            return Err(ScanError::EmptyPath);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ScanError::Worker(format!("no tokio runtime: {}", e)))?;

        let run_id = Uuid::new_v4().to_string();
        let guard = self.devices.try_acquire(run_id.clone())?;

        let grid = ScanGrid::from_path_with_kind(&path, self.instrument.value_kind());
        let cancel = CancellationFlag::new();
        if let Ok(mut active) = self.active_cancel.lock() {
            *active = Some(cancel.clone());
        }

        info!(
            run_id = %run_id,
            points = path.point_count(),
            columns = grid.x_labels().len(),
            rows = grid.y_labels().len(),
            kind = %self.instrument.value_kind(),
            "Starting acquisition"
        );

        let summary = ScanSummary::new(
            path.point_count(),
            settings.seconds_per_point,
            settings.overhead_seconds,
        );
        let progress = Arc::new(Mutex::new(RunProgress {
            grid,
            last_completed: None,
        }));
        let (run_state_tx, run_state_rx) = watch::channel(SequencerState::Idle);
        let states = StatePublisher {
            sequencer: Arc::clone(&self.state_tx),
            run: Arc::new(run_state_tx),
        };

        let session = AcquisitionSession {
            path,
            progress: Arc::clone(&progress),
            settings,
            summary,
            motion: Arc::clone(&self.motion),
            instrument: Arc::clone(&self.instrument),
            cancel: cancel.clone(),
            event_tx: self.event_tx.clone(),
            states: states.clone(),
            started: Instant::now(),
        };

        let span = info_span!("acquisition", run_id = %run_id);
        let event_tx = self.event_tx.clone();
        let task = runtime.spawn(
            async move {
                let worker = tokio::spawn(session.run().in_current_span());
                let outcome = match worker.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => aborted_outcome(&progress, join_error),
                };

                states.publish(outcome.state());
                let _ = event_tx.send(ScanEvent::State(outcome.state()));
                let _ = event_tx.send(terminal_event(&outcome));

                // Released only after observers have seen the end of the run.
                drop(guard);
                outcome
            }
            .instrument(span),
        );

        Ok(ScanHandle {
            run_id,
            cancel,
            state_rx: run_state_rx,
            task,
        })
    }

    /// Request cancellation of the running acquisition, if any.
    ///
    /// No effect once the run has finished. A device call in flight is not interrupted.
    pub fn cancel(&self) {
        if let Ok(active) = self.active_cancel.lock() {
            if let Some(flag) = active.as_ref() {
                flag.cancel();
            }
        }
    }
}

/// Caller's handle on one acquisition.
pub struct ScanHandle {
    run_id: String,
    cancel: CancellationFlag,
    state_rx: watch::Receiver<SequencerState>,
    task: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    /// Unique id of this run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation; the worker stops before its next device call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest state of this run.
    ///
    /// Unlike [`AcquisitionSequencer::state`], this stays on the run's terminal state
    /// after a later run has started.
    pub fn state(&self) -> SequencerState {
        *self.state_rx.borrow()
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end.
    pub async fn join(self) -> ScanResult<ScanOutcome> {
        self.task
            .await
            .map_err(|e| ScanError::Worker(e.to_string()))
    }
}

/// Why a run stopped before the end of the sequence.
enum Interrupt {
    Cancelled,
    Device(ScanError),
}

/// Grid and cursor of one run, shared with the worker boundary so a panicking worker
/// still leaves a partial result behind.
struct RunProgress {
    grid: ScanGrid,
    last_completed: Option<usize>,
}

fn lock_progress(progress: &Mutex<RunProgress>) -> MutexGuard<'_, RunProgress> {
    progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Publishes state to both the sequencer-wide and the per-run watch channel.
#[derive(Clone)]
struct StatePublisher {
    sequencer: Arc<watch::Sender<SequencerState>>,
    run: Arc<watch::Sender<SequencerState>>,
}

impl StatePublisher {
    fn publish(&self, state: SequencerState) {
        self.sequencer.send_replace(state);
        self.run.send_replace(state);
    }
}

/// Worker-side state of one run.
struct AcquisitionSession {
    path: ScanPath,
    progress: Arc<Mutex<RunProgress>>,
    settings: ResolvedScanConfig,
    summary: ScanSummary,
    motion: Arc<dyn MotionStage>,
    instrument: Arc<dyn Instrument>,
    cancel: CancellationFlag,
    event_tx: broadcast::Sender<ScanEvent>,
    states: StatePublisher,
    started: Instant,
}

impl AcquisitionSession {
    async fn run(mut self) -> ScanOutcome {
        let result = self.execute().await;
        let (grid, last_completed) = {
            let mut progress = lock_progress(&self.progress);
            (
                std::mem::replace(&mut progress.grid, ScanGrid::empty()),
                progress.last_completed,
            )
        };

        match result {
            Ok(()) => {
                info!(
                    points = grid.filled_count(),
                    elapsed_s = self.started.elapsed().as_secs_f64(),
                    "Acquisition complete"
                );
                ScanOutcome::Completed {
                    grid,
                    cancelled: false,
                }
            }
            Err(Interrupt::Cancelled) => {
                warn!(
                    last_completed_index = ?last_completed,
                    filled = grid.filled_count(),
                    "Acquisition cancelled"
                );
                ScanOutcome::Completed {
                    grid,
                    cancelled: true,
                }
            }
            Err(Interrupt::Device(error)) => {
                error!(
                    error = %error,
                    last_completed_index = ?last_completed,
                    "Acquisition failed"
                );
                ScanOutcome::Failed {
                    error,
                    last_completed_index: last_completed,
                    grid,
                }
            }
        }
    }

    async fn execute(&mut self) -> Result<(), Interrupt> {
        self.report_progress(0);

        self.transition(SequencerState::Homing);
        self.checkpoint()?;
        self.motion.home().await.map_err(|e| Interrupt::Device(e.into()))?;

        self.transition(SequencerState::TracingBoundary);
        self.trace_boundary().await?;

        let pass_height = self.path.geometry().pass_height;
        for index in 0..self.path.point_count() {
            self.transition(SequencerState::Scanning { index });
            let point = self.path.points()[index];

            self.move_stage(point.actuator_position).await?;

            self.checkpoint()?;
            let value = self
                .instrument
                .measure(self.settings.frequency_hz, self.settings.dwell)
                .await
                .map_err(|e| Interrupt::Device(e.into()))?;

            self.record(index, point.probe_position, value)?;

            debug!(
                index,
                x = point.probe_position.x,
                y = point.probe_position.y,
                %value,
                "Measured point"
            );

            self.report_progress(index + 1);
            self.emit(ScanEvent::LastMeasurement(value.for_display()));
            let done = index + 1;
            if done % self.settings.snapshot_interval == 0 || done == self.path.point_count() {
                let snapshot = lock_progress(&self.progress).grid.clone();
                self.emit(ScanEvent::GridUpdated(Arc::new(snapshot)));
            }
        }

        self.transition(SequencerState::Draining);
        self.move_stage(Point3::new(0.0, 0.0, pass_height)).await?;
        Ok(())
    }

    /// Lift to the clearance height and run the stage around the actuator outline.
    async fn trace_boundary(&mut self) -> Result<(), Interrupt> {
        let z = self.path.geometry().pass_height + BOUNDARY_CLEARANCE_MM;
        self.move_stage(Point3::new(0.0, 0.0, z)).await?;

        if let Some(outline) = self.path.actuator_bounding_box() {
            for (x, y) in outline {
                self.move_stage(Point3::new(x, y, z)).await?;
            }
        }
        Ok(())
    }

    async fn move_stage(&self, target: Point3) -> Result<(), Interrupt> {
        self.checkpoint()?;
        self.motion
            .move_to(target, self.settings.feed_rate)
            .await
            .map_err(|e| Interrupt::Device(e.into()))
    }

    /// Store the raw reading at the probe coordinate and advance the cursor.
    fn record(&self, index: usize, probe: Point3, value: Scalar) -> Result<(), Interrupt> {
        let mut progress = lock_progress(&self.progress);
        progress
            .grid
            .set(probe.x, probe.y, value)
            .map_err(Interrupt::Device)?;
        progress.last_completed = Some(index);
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&self, state: SequencerState) {
        self.states.publish(state);
        self.emit(ScanEvent::State(state));
    }

    fn report_progress(&self, completed: usize) {
        self.emit(ScanEvent::Progress(completed));
        self.emit(ScanEvent::Summary(
            self.summary.at(completed, self.started.elapsed()),
        ));
    }

    fn emit(&self, event: ScanEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Outcome of a worker that panicked or was torn down with its runtime.
fn aborted_outcome(progress: &Mutex<RunProgress>, join_error: JoinError) -> ScanOutcome {
    let reason = if join_error.is_panic() {
        let payload = join_error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("acquisition worker panicked: {}", message)
    } else {
        format!("acquisition worker aborted: {}", join_error)
    };

    let mut progress = lock_progress(progress);
    error!(
        error = %reason,
        last_completed_index = ?progress.last_completed,
        "Acquisition failed"
    );
    ScanOutcome::Failed {
        error: ScanError::Worker(reason),
        last_completed_index: progress.last_completed,
        grid: std::mem::replace(&mut progress.grid, ScanGrid::empty()),
    }
}

fn terminal_event(outcome: &ScanOutcome) -> ScanEvent {
    match outcome {
        ScanOutcome::Completed { grid, cancelled } => ScanEvent::Completed {
            grid: Arc::new(grid.clone()),
            cancelled: *cancelled,
        },
        ScanOutcome::Failed {
            error,
            last_completed_index,
            grid,
        } => ScanEvent::Failed {
            error: error.to_string(),
            last_completed_index: *last_completed_index,
            grid: Arc::new(grid.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::experiment::planner::ScanArea;
    use crate::hardware::mock::{MockSpectrumAnalyzer, MockStage, MockVna};
    use crate::measurement_types::{Scalar, ValueKind};
    use tracing_test::traced_test;

    fn example_config() -> ScanConfig {
        AppConfig::from_toml_str(
            r#"
            [scan.stage]
            feed_rate = 1500.0
            travel_x = 220.0
            travel_y = 220.0

            [scan.instrument]
            frequency_hz = 2.28e9
            dwell = 1.0

            [scan.path]
            pass_height = 5.0
            sample_x = 30.0
            sample_y = 30.0
            sample_width = 6.0
            sample_length = 6.0
            offset_x = 1.0
            offset_y = 56.0
            measurement_radius = 3.0

            [scan.progress]
            seconds_per_point = 4.0
            overhead_seconds = 60.0
            "#,
        )
        .unwrap()
        .scan
    }

    async fn collect_until_terminal(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv().await.unwrap();
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_full_run_fills_grid() {
        let stage = Arc::new(MockStage::new());
        let analyzer = Arc::new(MockSpectrumAnalyzer::new().with_fixed_reading(-20.1234));
        let sequencer = AcquisitionSequencer::new(stage.clone(), analyzer.clone());
        let config = example_config();

        let handle = sequencer.start(config.geometry().unwrap(), &config).unwrap();
        let outcome = handle.join().await.unwrap();

        assert!(!outcome.is_cancelled());
        assert_eq!(outcome.state(), SequencerState::Completed);
        assert_eq!(outcome.grid().filled_count(), 9);
        assert_eq!(outcome.grid().get(31.5, 37.5).unwrap(), Some(Scalar::Real(-20.1234)));
        assert_eq!(analyzer.read_count(), 9);
        assert_eq!(sequencer.state(), SequencerState::Completed);
        assert!(!sequencer.is_running());

        // clearance + closed outline + 9 points + park
        let targets = stage.move_targets().await;
        assert_eq!(targets.len(), 1 + 5 + 9 + 1);
        assert_eq!(targets[0], Point3::new(0.0, 0.0, 10.0));
        assert_eq!(targets[6], Point3::new(32.5, 87.5, 5.0));
        assert_eq!(targets[15], Point3::new(0.0, 0.0, 5.0));
    }

    #[tokio::test]
    async fn test_events_of_full_run() {
        let stage = Arc::new(MockStage::new());
        let analyzer = Arc::new(MockSpectrumAnalyzer::new().with_fixed_reading(-20.1234));
        let sequencer = AcquisitionSequencer::new(stage, analyzer);
        let mut rx = sequencer.subscribe();
        let config = example_config();

        let _handle = sequencer.start(config.geometry().unwrap(), &config).unwrap();
        let events = collect_until_terminal(&mut rx).await;

        let progress: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Progress(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(progress, (0..=9).collect::<Vec<_>>());

        let readings: Vec<Scalar> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::LastMeasurement(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(readings, vec![Scalar::Real(-20.123); 9]);

        let snapshots = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::GridUpdated(_)))
            .count();
        assert_eq!(snapshots, 9);

        let summaries = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::Summary(_)))
            .count();
        assert_eq!(summaries, 10);

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let Some(ScanEvent::Completed { grid, cancelled }) = events.last() else {
            panic!("last event is not Completed");
        };
        assert!(!cancelled);
        assert_eq!(grid.filled_count(), 9);
    }

    #[tokio::test]
    async fn test_cancel_before_first_move() {
        let stage = Arc::new(MockStage::new());
        let sequencer = AcquisitionSequencer::new(stage.clone(), Arc::new(MockVna::new()));
        let mut rx = sequencer.subscribe();
        let config = example_config();
        let geometry = config.geometry().unwrap();

        let handle = sequencer.start(geometry, &config).unwrap();
        // Current-thread runtime: the worker has not been polled yet
        handle.cancel();

        let events = collect_until_terminal(&mut rx).await;
        let max_progress = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Progress(n) => Some(*n),
                _ => None,
            })
            .max();
        assert_eq!(max_progress, Some(0));

        let Some(ScanEvent::Completed { grid, cancelled }) = events.last() else {
            panic!("last event is not Completed");
        };
        assert!(cancelled);
        let fresh = ScanGrid::from_path_with_kind(&plan(&geometry).unwrap(), ValueKind::Complex);
        assert_eq!(**grid, fresh);

        let outcome = handle.join().await.unwrap();
        assert!(outcome.is_cancelled());
        assert!(stage.commands().await.is_empty());
    }

    #[tokio::test]
    async fn test_device_error_fails_run() {
        // 6 boundary moves, then the second point's move fails
        let stage = Arc::new(MockStage::new().failing_at_move(8));
        let sequencer = AcquisitionSequencer::new(stage, Arc::new(MockVna::new()));
        let mut rx = sequencer.subscribe();
        let config = example_config();

        let handle = sequencer.start(config.geometry().unwrap(), &config).unwrap();
        let events = collect_until_terminal(&mut rx).await;
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Completed { .. })));

        let Some(ScanEvent::Failed {
            last_completed_index,
            grid,
            ..
        }) = events.last()
        else {
            panic!("last event is not Failed");
        };
        assert_eq!(*last_completed_index, Some(0));
        assert_eq!(grid.filled_count(), 1);

        let ScanOutcome::Failed { error, .. } = handle.join().await.unwrap() else {
            panic!("expected Failed outcome");
        };
        assert!(matches!(error, ScanError::Motion(_)));
        assert_eq!(sequencer.state(), SequencerState::Failed);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let stage = Arc::new(MockStage::new());
        let sequencer = AcquisitionSequencer::new(stage, Arc::new(MockVna::new()));
        let config = example_config();
        let geometry = config.geometry().unwrap();

        let first = sequencer.start(geometry, &config).unwrap();
        assert!(matches!(
            sequencer.start(geometry, &config),
            Err(ScanError::AlreadyRunning)
        ));

        first.join().await.unwrap();
        let second = sequencer.start(geometry, &config).unwrap();
        assert_ne!(second.run_id(), "");
        second.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_validates_before_spawning() {
        let sequencer =
            AcquisitionSequencer::new(Arc::new(MockStage::new()), Arc::new(MockVna::new()));
        let config = example_config();
        let geometry = config.geometry().unwrap();

        let mut incomplete = config.clone();
        incomplete.instrument.dwell = None;
        let Err(ScanError::ConfigIncomplete { missing }) = sequencer.start(geometry, &incomplete)
        else {
            panic!("expected ConfigIncomplete");
        };
        assert_eq!(missing, vec!["instrument.dwell".to_string()]);

        let outside = ScanGeometry {
            area: ScanArea::new(500.0, 500.0, 6.0, 6.0),
            ..geometry
        };
        assert!(matches!(
            sequencer.start(outside, &config),
            Err(ScanError::EmptyPath)
        ));

        let degenerate = ScanGeometry {
            measurement_radius: 0.0,
            ..geometry
        };
        assert!(matches!(
            sequencer.start(degenerate, &config),
            Err(ScanError::InvalidGeometry(_))
        ));

        assert_eq!(sequencer.state(), SequencerState::Idle);
        assert!(!sequencer.is_running());
    }

    /// Instrument whose driver panics on the n-th read.
    struct PanickingInstrument {
        reads: std::sync::atomic::AtomicUsize,
        panic_at: usize,
    }

    #[async_trait::async_trait]
    impl Instrument for PanickingInstrument {
        async fn measure(
            &self,
            _frequency_hz: f64,
            _dwell: f64,
        ) -> Result<Scalar, crate::error::InstrumentError> {
            let read = self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if read == self.panic_at {
                panic!("driver bug");
            }
            Ok(Scalar::Real(-20.0))
        }

        fn value_kind(&self) -> ValueKind {
            ValueKind::Real
        }
    }

    #[tokio::test]
    async fn test_panicking_instrument_ends_run_with_failed() {
        let instrument = Arc::new(PanickingInstrument {
            reads: Default::default(),
            panic_at: 3,
        });
        let sequencer = AcquisitionSequencer::new(Arc::new(MockStage::new()), instrument);
        let mut rx = sequencer.subscribe();
        let config = example_config();

        let handle = sequencer.start(config.geometry().unwrap(), &config).unwrap();
        let events = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            collect_until_terminal(&mut rx),
        )
        .await
        .expect("no terminal event after a collaborator panic");

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, ScanEvent::State(SequencerState::Failed))));
        let Some(ScanEvent::Failed {
            error,
            last_completed_index,
            grid,
        }) = events.last()
        else {
            panic!("last event is not Failed");
        };
        assert!(error.contains("driver bug"), "{}", error);
        assert_eq!(*last_completed_index, Some(1));
        assert_eq!(grid.filled_count(), 2);

        let ScanOutcome::Failed { error, .. } = handle.join().await.unwrap() else {
            panic!("expected Failed outcome");
        };
        assert!(matches!(error, ScanError::Worker(_)));
        assert_eq!(sequencer.state(), SequencerState::Failed);
        assert!(!sequencer.is_running());
    }

    #[tokio::test]
    async fn test_terminal_state_published_before_devices_released() {
        let sequencer =
            AcquisitionSequencer::new(Arc::new(MockStage::new()), Arc::new(MockVna::new()));
        let mut rx = sequencer.subscribe();
        let config = example_config();

        let handle = sequencer.start(config.geometry().unwrap(), &config).unwrap();
        collect_until_terminal(&mut rx).await;

        // Observers see the end of the run no later than the devices become free
        assert_eq!(sequencer.state(), SequencerState::Completed);
        handle.join().await.unwrap();
        assert!(!sequencer.is_running());
    }

    #[tokio::test]
    async fn test_watch_state_follows_transitions() {
        let sequencer =
            AcquisitionSequencer::new(Arc::new(MockStage::new()), Arc::new(MockVna::new()));
        let mut states = sequencer.watch_state();
        assert_eq!(*states.borrow(), SequencerState::Idle);
        let config = example_config();

        let handle = sequencer.start(config.geometry().unwrap(), &config).unwrap();
        states.changed().await.unwrap();
        assert_ne!(*states.borrow_and_update(), SequencerState::Idle);

        let terminal = *states.wait_for(|state| state.is_terminal()).await.unwrap();
        assert_eq!(terminal, SequencerState::Completed);
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_state_belongs_to_its_run() {
        let sequencer =
            AcquisitionSequencer::new(Arc::new(MockStage::new()), Arc::new(MockVna::new()));
        let config = example_config();
        let geometry = config.geometry().unwrap();

        let first = sequencer.start(geometry, &config).unwrap();
        assert_eq!(first.state(), SequencerState::Idle);
        let mut states = sequencer.watch_state();
        states.wait_for(|state| state.is_terminal()).await.unwrap();
        while sequencer.is_running() {
            tokio::task::yield_now().await;
        }

        let second = sequencer.start(geometry, &config).unwrap();
        second.cancel();
        assert!(second.join().await.unwrap().is_cancelled());

        assert_eq!(sequencer.state(), SequencerState::Cancelled);
        assert_eq!(first.state(), SequencerState::Completed);
        assert!(first.is_finished());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_is_logged_with_last_index() {
        let instrument = Arc::new(MockSpectrumAnalyzer::new().failing_at_read(3));
        let sequencer = AcquisitionSequencer::new(Arc::new(MockStage::new()), instrument);
        let config = example_config();

        let handle = sequencer.start(config.geometry().unwrap(), &config).unwrap();
        let outcome = handle.join().await.unwrap();

        let ScanOutcome::Failed {
            error,
            last_completed_index,
            grid,
        } = outcome
        else {
            panic!("expected Failed outcome");
        };
        assert!(matches!(error, ScanError::Instrument(_)));
        assert_eq!(last_completed_index, Some(1));
        assert_eq!(grid.filled_count(), 2);

        assert!(logs_contain("Starting acquisition"));
        assert!(logs_contain("Acquisition failed"));
    }
}
