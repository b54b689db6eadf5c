//! The scanner adapter: strictly ordered, single-thread-owned card access.
//!
//! The thread that calls [`Scanner::initialize`] becomes the owner; every
//! later entry point asserts the caller is that thread. Ownership violations
//! are programming errors and are reported as `ThreadOwnership` so the run
//! aborts instead of corrupting device state.

use crate::driver::{DriverError, GalvoDriver};
use crate::library;
use marc_common::config::ScannerSettings;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Completion poll interval while waiting for a list to drain.
const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Scanner adapter errors.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// The card refused a command with a status code.
    #[error("device rejected {op} (code {code})")]
    DeviceReject {
        /// Operation name.
        op: &'static str,
        /// Vendor status code.
        code: u32,
    },

    /// The card or driver failed outside the status-code space.
    #[error("device fault during {op}: {reason}")]
    DeviceFault {
        /// Operation name.
        op: &'static str,
        /// Failure description.
        reason: String,
    },

    /// An operation did not complete within its budget.
    #[error("device {op} did not complete in time")]
    DeviceTimeout {
        /// Operation name.
        op: &'static str,
    },

    /// Entry point called from a thread that does not own the adapter.
    #[error("{op} called from a non-owner thread")]
    ThreadOwnership {
        /// Operation name.
        op: &'static str,
    },

    /// Operation requires a completed `initialize`.
    #[error("scanner is not initialized")]
    NotInitialized,

    /// Driver library bookkeeping failure.
    #[error("driver library: {0}")]
    Library(#[from] library::LibraryError),

    /// Precondition violation inside the adapter.
    #[error("scanner precondition violated: {0}")]
    Internal(String),
}

impl From<DriverError> for ScannerError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Rejected { op, code } => ScannerError::DeviceReject { op, code },
            DriverError::Fault { op, reason } => ScannerError::DeviceFault { op, reason },
        }
    }
}

/// Single-thread-owned galvo scanner adapter.
///
/// The adapter wraps a [`GalvoDriver`] backend and adds the list-level
/// counter, ownership enforcement and laser-power scaling. Exactly one
/// adapter is active at a time; the consumer task owns it for the whole run.
pub struct Scanner {
    driver: Box<dyn GalvoDriver>,
    settings: ScannerSettings,
    owner: Option<ThreadId>,
    initialized: bool,
    holds_library: bool,
    list_open: bool,
    list_level: u32,
}

impl Scanner {
    /// Wrap a driver backend. No card access happens here.
    pub fn new(driver: Box<dyn GalvoDriver>) -> Self {
        Self {
            driver,
            settings: ScannerSettings::default(),
            owner: None,
            initialized: false,
            holds_library: false,
            list_open: false,
            list_level: 0,
        }
    }

    /// Take a reference on the process-wide driver library.
    ///
    /// Callable from any thread; must precede [`Scanner::initialize`].
    pub fn acquire(&mut self) -> Result<(), ScannerError> {
        if self.holds_library {
            return Ok(());
        }
        library::acquire()?;
        self.holds_library = true;
        Ok(())
    }

    /// Drop this adapter's library reference.
    pub fn release(&mut self) -> Result<(), ScannerError> {
        if !self.holds_library {
            return Ok(());
        }
        library::release()?;
        self.holds_library = false;
        Ok(())
    }

    /// Open the card and record the calling thread as the adapter's owner.
    ///
    /// Must be called on the thread that will drive the adapter for the rest
    /// of the run.
    pub fn initialize(&mut self, settings: ScannerSettings) -> Result<(), ScannerError> {
        if self.initialized {
            tracing::debug!("scanner already initialized");
            return Ok(());
        }
        if !self.holds_library {
            return Err(ScannerError::Internal(
                "initialize called before acquire".to_string(),
            ));
        }

        self.owner = Some(thread::current().id());
        self.settings = settings;

        if let Err(e) = self.driver.open(&self.settings) {
            self.owner = None;
            return Err(e.into());
        }

        self.initialized = true;
        self.list_open = false;
        self.list_level = 0;
        tracing::info!("scanner initialized ({} driver)", self.driver.name());
        Ok(())
    }

    /// Whether `initialize` has completed.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Close the card. Idempotent; asserts the owner when one is recorded.
    pub fn shutdown(&mut self) -> Result<(), ScannerError> {
        if !self.initialized {
            return Ok(());
        }
        self.assert_owner("shutdown")?;
        self.driver.close();
        self.initialized = false;
        self.list_open = false;
        self.list_level = 0;
        self.owner = None;
        tracing::info!("scanner shut down");
        Ok(())
    }

    /// Reset any pending command buffer and open a fresh list.
    ///
    /// Required before queueing a layer's commands; the card rejects queue
    /// calls while no list is open.
    pub fn prepare_list_for_layer(&mut self) -> Result<(), ScannerError> {
        self.checked("prepare_list_for_layer")?;
        self.driver.begin_list()?;
        self.list_open = true;
        self.list_level = 0;
        Ok(())
    }

    /// Apply one parameter segment: laser power, mark speed, jump speed.
    ///
    /// Subsequent jump/mark commands use these values until changed.
    pub fn apply_segment_parameters(
        &mut self,
        power_w: f64,
        mark_speed_mm_s: f64,
        jump_speed_mm_s: f64,
    ) -> Result<(), ScannerError> {
        self.checked("apply_segment_parameters")?;

        let analog = self.power_to_analog(power_w);
        self.driver.set_mark_speed(mark_speed_mm_s)?;
        self.driver.set_jump_speed(jump_speed_mm_s)?;
        self.driver.set_laser_power(analog)?;

        tracing::debug!(
            "segment parameters applied: {power_w:.1} W (analog {analog}), \
             mark {mark_speed_mm_s:.1} mm/s, jump {jump_speed_mm_s:.1} mm/s"
        );
        Ok(())
    }

    /// Queue a laser-off move.
    pub fn jump(&mut self, x: i32, y: i32) -> Result<(), ScannerError> {
        self.checked("jump")?;
        self.driver.jump_abs(x, y)?;
        self.list_level += 1;
        Ok(())
    }

    /// Queue a laser-on move.
    pub fn mark(&mut self, x: i32, y: i32) -> Result<(), ScannerError> {
        self.checked("mark")?;
        self.driver.mark_abs(x, y)?;
        self.list_level += 1;
        Ok(())
    }

    /// Queue an in-list dwell.
    pub fn delay(&mut self, ms: u32) -> Result<(), ScannerError> {
        self.checked("delay")?;
        self.driver.list_delay(ms)?;
        self.list_level += 1;
        Ok(())
    }

    /// Number of commands queued into the active list.
    ///
    /// Maintained by the adapter itself so batching never depends on a
    /// vendor readback.
    pub fn current_list_level(&self) -> Result<u32, ScannerError> {
        self.assert_owner("current_list_level")?;
        Ok(self.list_level)
    }

    /// Close the active list and begin executing it.
    pub fn execute_list(&mut self) -> Result<(), ScannerError> {
        self.checked("execute_list")?;
        if !self.list_open {
            return Err(ScannerError::Internal(
                "execute_list without an open list".to_string(),
            ));
        }
        self.driver.close_and_execute()?;
        self.list_open = false;
        Ok(())
    }

    /// Wait for the executing list to drain.
    ///
    /// Returns `true` when the card went idle within the timeout, `false`
    /// on timeout.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> Result<bool, ScannerError> {
        self.checked("wait_for_completion")?;
        let deadline = Instant::now() + timeout;
        loop {
            if !self.driver.busy()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(BUSY_POLL_INTERVAL);
        }
    }

    /// Force laser output to zero. Unconditional while the card is open.
    pub fn disable_laser(&mut self) -> Result<(), ScannerError> {
        self.checked("disable_laser")?;
        self.driver.laser_off()?;
        Ok(())
    }

    /// Clear latched card errors.
    pub fn reset_error(&mut self) -> Result<(), ScannerError> {
        self.checked("reset_error")?;
        self.driver.reset_error()?;
        Ok(())
    }

    // ── Internal ──

    fn power_to_analog(&self, power_w: f64) -> u32 {
        let scaled = (power_w / self.settings.laser_power_scale_w * 4095.0).round();
        scaled.clamp(0.0, 4095.0) as u32
    }

    fn checked(&self, op: &'static str) -> Result<(), ScannerError> {
        self.assert_owner(op)?;
        if !self.initialized {
            return Err(ScannerError::NotInitialized);
        }
        Ok(())
    }

    fn assert_owner(&self, op: &'static str) -> Result<(), ScannerError> {
        match self.owner {
            // Before initialize any thread may touch the adapter.
            None => Ok(()),
            Some(owner) if owner == thread::current().id() => Ok(()),
            Some(_) => {
                tracing::error!("{op} called from a non-owner thread");
                Err(ScannerError::ThreadOwnership { op })
            }
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if self.holds_library {
            let _ = library::release();
            self.holds_library = false;
        }
    }
}
