//! Galvo card driver trait and error types.
//!
//! The trait is the seam where vendor hardware plugs in. It mirrors the card
//! list lifecycle: open a list, queue commands into it, close and execute,
//! poll until idle. Implementations do not need to be thread-safe — the
//! [`crate::Scanner`] guarantees single-thread access.

use marc_common::config::ScannerSettings;
use thiserror::Error;

/// Error from the raw card driver.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The card refused the operation with a status code.
    #[error("driver rejected {op} (code {code})")]
    Rejected {
        /// Operation name.
        op: &'static str,
        /// Vendor status code.
        code: u32,
    },

    /// The driver failed outside the card's status-code space.
    #[error("driver fault during {op}: {reason}")]
    Fault {
        /// Operation name.
        op: &'static str,
        /// Failure description.
        reason: String,
    },
}

/// Raw galvo card operations.
///
/// # Lifecycle
///
/// 1. `open()` — select and program the card; called once per run
/// 2. `begin_list()` / queue / `close_and_execute()` — repeated per batch
/// 3. `busy()` — poll until the executed list has drained
/// 4. `close()` — release the card
///
/// Queue calls (`jump_abs`, `mark_abs`, `list_delay`) are only valid while a
/// list is open; the card rejects them otherwise.
pub trait GalvoDriver: Send {
    /// Driver identifier (e.g. `"sim"`).
    fn name(&self) -> &'static str;

    /// Select and program the card.
    fn open(&mut self, settings: &ScannerSettings) -> Result<(), DriverError>;

    /// Open a fresh command list, discarding any pending one.
    fn begin_list(&mut self) -> Result<(), DriverError>;

    /// Set the mark (laser-on) speed [mm/s] for subsequent commands.
    fn set_mark_speed(&mut self, mm_s: f64) -> Result<(), DriverError>;

    /// Set the jump (laser-off) speed [mm/s] for subsequent commands.
    fn set_jump_speed(&mut self, mm_s: f64) -> Result<(), DriverError>;

    /// Set the laser pump analog output (0..=4095).
    fn set_laser_power(&mut self, analog: u32) -> Result<(), DriverError>;

    /// Queue a laser-off move to absolute device coordinates.
    fn jump_abs(&mut self, x: i32, y: i32) -> Result<(), DriverError>;

    /// Queue a laser-on move to absolute device coordinates.
    fn mark_abs(&mut self, x: i32, y: i32) -> Result<(), DriverError>;

    /// Queue an in-list dwell [ms].
    fn list_delay(&mut self, ms: u32) -> Result<(), DriverError>;

    /// Close the open list and start executing it.
    fn close_and_execute(&mut self) -> Result<(), DriverError>;

    /// Whether the card is still executing a list.
    fn busy(&mut self) -> Result<bool, DriverError>;

    /// Force laser output to zero. Must succeed whenever the card is open.
    fn laser_off(&mut self) -> Result<(), DriverError>;

    /// Clear latched card errors.
    fn reset_error(&mut self) -> Result<(), DriverError>;

    /// Release the card. Idempotent.
    fn close(&mut self);
}
