//! Cooperative cancellation and exclusive device ownership.
//!
//! - [`CancellationFlag`]: shared atomic flag set by the caller and polled by the
//!   acquisition worker between device calls. Setting it never interrupts a call that is
//!   already in flight.
//! - [`DeviceLock`] / [`RunGuard`]: marks the motion stage and instrument as owned by a
//!   running acquisition. The guard lives inside the worker task and releases the devices
//!   on drop, including when the task unwinds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ScanError, ScanResult};

/// Shared cancellation request.
///
/// # Example
///
/// ```rust,ignore
/// let flag = CancellationFlag::new();
/// let worker_flag = flag.clone();
/// flag.cancel();
/// assert!(worker_flag.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    flag: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// A cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Ownership marker for one set of physical devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceLock {
    busy: Arc<AtomicBool>,
}

impl DeviceLock {
    /// An unowned lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership, failing with [`ScanError::AlreadyRunning`] while another guard
    /// is alive.
    pub fn try_acquire(&self, owner: impl Into<String>) -> ScanResult<RunGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScanError::AlreadyRunning)?;

        Ok(RunGuard {
            busy: Arc::clone(&self.busy),
            owner: owner.into(),
        })
    }

    /// Whether a guard is currently alive.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// RAII guard releasing a [`DeviceLock`] on drop.
#[derive(Debug)]
pub struct RunGuard {
    busy: Arc<AtomicBool>,
    owner: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
        if std::thread::panicking() {
            tracing::error!(owner = %self.owner, "Acquisition panicked, devices released");
        } else {
            tracing::debug!(owner = %self.owner, "Devices released");
        }
    }
}
