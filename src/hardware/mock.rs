//! Mock Hardware Implementations
//!
//! Simulated collaborators for running acquisitions without a stage or receiver attached.
//! All mocks use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockStage` - X/Y/Z stage that tracks its position and records every command
//! - `MockSpectrumAnalyzer` - real-valued level readings around -20 dBm
//! - `MockVna` - complex readings with real and imaginary parts in [0, 1)
//!
//! # Timing
//!
//! Mocks are instant by default. `MockStage::with_time_scale` simulates travel time from
//! the commanded feed rate; the instruments take an optional fixed per-read delay.
//!
//! # Failure injection
//!
//! Every mock can be told to fail its n-th call (1-based), which is how the acquisition
//! tests exercise the `Failed` terminal state.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};

use crate::error::{DeviceErrorKind, InstrumentError, MotionError};
use crate::experiment::planner::Point3;
use crate::hardware::capabilities::{Instrument, MotionStage};
use crate::measurement_types::{Scalar, ValueKind};

/// Nominal level returned by the simulated spectrum analyzer (dBm).
pub const ANALYZER_NOMINAL_LEVEL: f64 = -20.0;

/// Half-width of the uniform noise band around the nominal level (dB).
pub const ANALYZER_NOISE: f64 = 2.0;

/// Count one call and report whether it is the one configured to fail.
fn next_call_fails(counter: &AtomicUsize, fail_at: Option<usize>) -> Option<usize> {
    let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
    (fail_at == Some(call)).then_some(call)
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// =============================================================================
// MockStage - Simulated Motion Stage
// =============================================================================

/// A command received by [`MockStage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageCommand {
    /// `home()`
    Home,
    /// `move_to(target, feed_rate)`
    MoveTo {
        /// Absolute target (mm)
        target: Point3,
        /// Feed rate (mm/min)
        feed_rate: f64,
    },
}

/// Mock X/Y/Z stage.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::new().failing_at_move(3);
/// stage.move_to(Point3::new(1.0, 2.0, 5.0), 1500.0).await?;
/// assert_eq!(stage.position().await, Point3::new(1.0, 2.0, 5.0));
/// ```
pub struct MockStage {
    position: Arc<RwLock<Point3>>,
    commands: Arc<Mutex<Vec<StageCommand>>>,
    time_scale: f64,
    fail_at_move: Option<usize>,
    moves: AtomicUsize,
}

impl MockStage {
    /// Instant stage at the origin.
    pub fn new() -> Self {
        Self {
            position: Arc::new(RwLock::new(Point3::new(0.0, 0.0, 0.0))),
            commands: Arc::new(Mutex::new(Vec::new())),
            time_scale: 0.0,
            fail_at_move: None,
            moves: AtomicUsize::new(0),
        }
    }

    /// Simulate travel time.
    ///
    /// # Arguments
    /// * `time_scale` - Multiplier on the physical travel time; `1.0` is real time,
    ///   `0.0` disables sleeping
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale.max(0.0);
        self
    }

    /// Fail the n-th `move_to` call (1-based) with a communication error.
    pub fn failing_at_move(mut self, move_number: usize) -> Self {
        self.fail_at_move = Some(move_number);
        self
    }

    /// Current position.
    pub async fn position(&self) -> Point3 {
        *self.position.read().await
    }

    /// Every command received so far, in order.
    pub async fn commands(&self) -> Vec<StageCommand> {
        self.commands.lock().await.clone()
    }

    /// Targets of all `move_to` calls, in order.
    pub async fn move_targets(&self) -> Vec<Point3> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|command| match command {
                StageCommand::MoveTo { target, .. } => Some(*target),
                StageCommand::Home => None,
            })
            .collect()
    }

    async fn travel(&self, target: Point3, feed_rate: f64) {
        let current = *self.position.read().await;
        if self.time_scale > 0.0 && feed_rate > 0.0 {
            let distance = ((target.x - current.x).powi(2)
                + (target.y - current.y).powi(2)
                + (target.z - current.z).powi(2))
            .sqrt();
            let seconds = distance / feed_rate * 60.0 * self.time_scale;
            sleep(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)).await;
        }
        *self.position.write().await = target;
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionStage for MockStage {
    async fn home(&self) -> Result<(), MotionError> {
        self.commands.lock().await.push(StageCommand::Home);
        tracing::debug!("MockStage: homing");
        self.travel(Point3::new(0.0, 0.0, 0.0), 3000.0).await;
        Ok(())
    }

    async fn move_to(&self, target: Point3, feed_rate: f64) -> Result<(), MotionError> {
        self.commands
            .lock()
            .await
            .push(StageCommand::MoveTo { target, feed_rate });

        if let Some(call) = next_call_fails(&self.moves, self.fail_at_move) {
            return Err(MotionError::new(
                DeviceErrorKind::Communication,
                format!("simulated failure on move {}", call),
            ));
        }

        tracing::trace!(x = target.x, y = target.y, z = target.z, feed_rate, "MockStage: move");
        self.travel(target, feed_rate).await;
        Ok(())
    }
}

// =============================================================================
// Simulated instruments
// =============================================================================

/// Mock spectrum analyzer returning level readings in dBm.
///
/// Readings are uniform in `ANALYZER_NOMINAL_LEVEL ± ANALYZER_NOISE` unless a fixed
/// reading is configured.
pub struct MockSpectrumAnalyzer {
    rng: Mutex<StdRng>,
    fixed: Option<f64>,
    delay: Duration,
    fail_at_read: Option<usize>,
    reads: AtomicUsize,
}

impl MockSpectrumAnalyzer {
    /// Instant analyzer with entropy-seeded noise.
    pub fn new() -> Self {
        Self::seeded(None)
    }

    /// Analyzer with reproducible noise.
    pub fn seeded(seed: Option<u64>) -> Self {
        Self {
            rng: Mutex::new(seeded_rng(seed)),
            fixed: None,
            delay: Duration::ZERO,
            fail_at_read: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Always return `level`.
    pub fn with_fixed_reading(mut self, level: f64) -> Self {
        self.fixed = Some(level);
        self
    }

    /// Sleep for `delay` on every read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the n-th `measure` call (1-based).
    pub fn failing_at_read(mut self, read_number: usize) -> Self {
        self.fail_at_read = Some(read_number);
        self
    }

    /// Number of `measure` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for MockSpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Instrument for MockSpectrumAnalyzer {
    async fn measure(&self, frequency_hz: f64, dwell: f64) -> Result<Scalar, InstrumentError> {
        if let Some(call) = next_call_fails(&self.reads, self.fail_at_read) {
            return Err(InstrumentError::new(
                DeviceErrorKind::Timeout,
                format!("no level reading returned for read {}", call),
            ));
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let level = match self.fixed {
            Some(level) => level,
            None => self.rng.lock().await.gen_range(
                ANALYZER_NOMINAL_LEVEL - ANALYZER_NOISE..=ANALYZER_NOMINAL_LEVEL + ANALYZER_NOISE,
            ),
        };
        tracing::trace!(frequency_hz, dwell, level, "MockSpectrumAnalyzer: read");
        Ok(Scalar::Real(level))
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Real
    }
}

/// Mock vector network analyzer returning complex S-parameter readings.
pub struct MockVna {
    rng: Mutex<StdRng>,
    fixed: Option<Scalar>,
    delay: Duration,
    fail_at_read: Option<usize>,
    reads: AtomicUsize,
}

impl MockVna {
    /// Instant VNA with entropy-seeded readings.
    pub fn new() -> Self {
        Self::seeded(None)
    }

    /// VNA with reproducible readings.
    pub fn seeded(seed: Option<u64>) -> Self {
        Self {
            rng: Mutex::new(seeded_rng(seed)),
            fixed: None,
            delay: Duration::ZERO,
            fail_at_read: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Always return `re + im·j`.
    pub fn with_fixed_reading(mut self, re: f64, im: f64) -> Self {
        self.fixed = Some(Scalar::complex(re, im));
        self
    }

    /// Sleep for `delay` on every read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the n-th `measure` call (1-based).
    pub fn failing_at_read(mut self, read_number: usize) -> Self {
        self.fail_at_read = Some(read_number);
        self
    }

    /// Number of `measure` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for MockVna {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Instrument for MockVna {
    async fn measure(&self, frequency_hz: f64, dwell: f64) -> Result<Scalar, InstrumentError> {
        if let Some(call) = next_call_fails(&self.reads, self.fail_at_read) {
            return Err(InstrumentError::new(
                DeviceErrorKind::Communication,
                format!("USB transfer failed on read {}", call),
            ));
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let value = match self.fixed {
            Some(value) => value,
            None => {
                let mut rng = self.rng.lock().await;
                Scalar::complex(rng.gen::<f64>(), rng.gen::<f64>())
            }
        };
        tracing::trace!(frequency_hz, samples = dwell, %value, "MockVna: read");
        Ok(value)
    }

    fn value_kind(&self) -> ValueKind {
        ValueKind::Complex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_records_commands_and_position() {
        let stage = MockStage::new();
        stage.home().await.unwrap();
        stage.move_to(Point3::new(10.0, 20.0, 5.0), 1500.0).await.unwrap();

        assert_eq!(stage.position().await, Point3::new(10.0, 20.0, 5.0));
        assert_eq!(
            stage.commands().await,
            vec![
                StageCommand::Home,
                StageCommand::MoveTo {
                    target: Point3::new(10.0, 20.0, 5.0),
                    feed_rate: 1500.0
                }
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_fails_at_configured_move() {
        let stage = MockStage::new().failing_at_move(2);
        stage.move_to(Point3::new(1.0, 1.0, 1.0), 100.0).await.unwrap();
        let err = stage.move_to(Point3::new(2.0, 2.0, 2.0), 100.0).await.unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::Communication);

        // Position stays at the last successful target
        assert_eq!(stage.position().await, Point3::new(1.0, 1.0, 1.0));
        stage.move_to(Point3::new(3.0, 3.0, 3.0), 100.0).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_travel_time_follows_feed_rate() {
        let stage = MockStage::new().with_time_scale(1.0);
        let start = tokio::time::Instant::now();
        // 60 mm at 600 mm/min takes 6 s
        stage.move_to(Point3::new(60.0, 0.0, 0.0), 600.0).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_millis(6100));
    }

    #[tokio::test]
    async fn test_analyzer_readings_stay_in_noise_band() {
        let analyzer = MockSpectrumAnalyzer::seeded(Some(7));
        for _ in 0..100 {
            let Scalar::Real(level) = analyzer.measure(2.28e9, 1.0).await.unwrap() else {
                panic!("analyzer returned a complex value");
            };
            assert!((-22.0..=-18.0).contains(&level));
        }
        assert_eq!(analyzer.read_count(), 100);
    }

    #[tokio::test]
    async fn test_seeded_instruments_are_reproducible() {
        let a = MockVna::seeded(Some(42));
        let b = MockVna::seeded(Some(42));
        for _ in 0..5 {
            assert_eq!(a.measure(1e9, 10.0).await.unwrap(), b.measure(1e9, 10.0).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_vna_readings_are_complex_unit_square() {
        let vna = MockVna::new();
        assert_eq!(vna.value_kind(), ValueKind::Complex);
        let Scalar::Complex(c) = vna.measure(1e9, 10.0).await.unwrap() else {
            panic!("vna returned a real value");
        };
        assert!((0.0..1.0).contains(&c.re));
        assert!((0.0..1.0).contains(&c.im));
    }

    #[tokio::test]
    async fn test_instrument_failure_injection() {
        let vna = MockVna::new().with_fixed_reading(0.5, -0.5).failing_at_read(1);
        assert!(vna.measure(1e9, 10.0).await.is_err());
        assert_eq!(vna.measure(1e9, 10.0).await.unwrap(), Scalar::complex(0.5, -0.5));

        let analyzer = MockSpectrumAnalyzer::new().failing_at_read(2);
        analyzer.measure(1e9, 1.0).await.unwrap();
        let err = analyzer.measure(1e9, 1.0).await.unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::Timeout);
    }
}
