//! Simulation galvo driver.
//!
//! Behaves like the real card at the driver seam: queue calls are rejected
//! while no list is open, execution takes time proportional to the queued
//! commands, and `busy()` reports until that time has elapsed. Every call is
//! recorded in a shared trace so tests can assert exact command sequences
//! after a run. Fault injection hooks script rejections and hangs.

use crate::driver::{DriverError, GalvoDriver};
use marc_common::config::ScannerSettings;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Status code the simulated card returns for list-state violations.
const CODE_NO_LIST_OPEN: u32 = 33;
/// Status code for operations on a closed card.
const CODE_NOT_OPEN: u32 = 100;
/// Status code used for injected faults.
const CODE_INJECTED: u32 = 77;

/// One recorded driver call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceEvent {
    /// Card opened.
    Open,
    /// Fresh list opened.
    BeginList,
    /// Mark speed set [mm/s].
    SetMarkSpeed(f64),
    /// Jump speed set [mm/s].
    SetJumpSpeed(f64),
    /// Laser analog power set.
    SetPower(u32),
    /// Jump queued.
    Jump(i32, i32),
    /// Mark queued.
    Mark(i32, i32),
    /// Delay queued [ms].
    Delay(u32),
    /// List closed and executed with this many queued commands.
    Execute(u32),
    /// Laser forced off.
    LaserOff,
    /// Latched errors cleared.
    ResetError,
    /// Card closed.
    Close,
}

/// Recorded call sequence of a [`SimGalvo`].
#[derive(Debug, Default)]
pub struct SimTrace {
    /// All recorded events in call order.
    pub events: Vec<TraceEvent>,
}

impl SimTrace {
    /// Only the queued motion commands (jump/mark/delay), in order.
    pub fn commands(&self) -> Vec<TraceEvent> {
        self.events
            .iter()
            .copied()
            .filter(|e| matches!(e, TraceEvent::Jump(..) | TraceEvent::Mark(..) | TraceEvent::Delay(..)))
            .collect()
    }

    /// Number of `LaserOff` events.
    pub fn laser_off_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::LaserOff))
            .count()
    }

    /// Number of list executions.
    pub fn execute_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Execute(_)))
            .count()
    }

    /// The power values applied, in order.
    pub fn powers_applied(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::SetPower(v) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

/// Shared handle to a driver trace.
pub type SimTraceHandle = Arc<Mutex<SimTrace>>;

/// Simulated galvo card.
pub struct SimGalvo {
    open: bool,
    list_open: bool,
    queued: u32,
    queued_delay_ms: u64,
    total_commands: u64,
    command_time: Duration,
    busy_until: Option<Instant>,
    reject_command_at: Option<u64>,
    reject_next_execute: bool,
    never_complete: bool,
    trace: SimTraceHandle,
}

impl SimGalvo {
    /// Create a simulated card and the trace handle observing it.
    pub fn new() -> (Self, SimTraceHandle) {
        let trace: SimTraceHandle = Arc::default();
        let sim = Self {
            open: false,
            list_open: false,
            queued: 0,
            queued_delay_ms: 0,
            total_commands: 0,
            command_time: Duration::from_micros(20),
            busy_until: None,
            reject_command_at: None,
            reject_next_execute: false,
            never_complete: false,
            trace: Arc::clone(&trace),
        };
        (sim, trace)
    }

    /// Simulated execution cost per queued command.
    pub fn with_command_time(mut self, per_command: Duration) -> Self {
        self.command_time = per_command;
        self
    }

    /// Inject a rejection on the nth queued command of the run (1-based).
    pub fn reject_command_at(mut self, nth: u64) -> Self {
        self.reject_command_at = Some(nth);
        self
    }

    /// Inject a rejection on the next list execution.
    pub fn reject_next_execute(mut self) -> Self {
        self.reject_next_execute = true;
        self
    }

    /// Make every execution hang forever (completion timeouts).
    pub fn never_complete(mut self) -> Self {
        self.never_complete = true;
        self
    }

    fn record(&self, event: TraceEvent) {
        if let Ok(mut trace) = self.trace.lock() {
            trace.events.push(event);
        }
    }

    fn require_open(&self, op: &'static str) -> Result<(), DriverError> {
        if self.open {
            Ok(())
        } else {
            Err(DriverError::Rejected {
                op,
                code: CODE_NOT_OPEN,
            })
        }
    }

    fn queue(&mut self, op: &'static str, event: TraceEvent, delay_ms: u32) -> Result<(), DriverError> {
        self.require_open(op)?;
        if !self.list_open {
            return Err(DriverError::Rejected {
                op,
                code: CODE_NO_LIST_OPEN,
            });
        }
        self.total_commands += 1;
        if self.reject_command_at == Some(self.total_commands) {
            return Err(DriverError::Rejected {
                op,
                code: CODE_INJECTED,
            });
        }
        self.queued += 1;
        self.queued_delay_ms += u64::from(delay_ms);
        self.record(event);
        Ok(())
    }
}

impl GalvoDriver for SimGalvo {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn open(&mut self, _settings: &ScannerSettings) -> Result<(), DriverError> {
        self.open = true;
        self.list_open = false;
        self.queued = 0;
        self.queued_delay_ms = 0;
        self.record(TraceEvent::Open);
        Ok(())
    }

    fn begin_list(&mut self) -> Result<(), DriverError> {
        self.require_open("begin_list")?;
        self.list_open = true;
        self.queued = 0;
        self.queued_delay_ms = 0;
        self.record(TraceEvent::BeginList);
        Ok(())
    }

    fn set_mark_speed(&mut self, mm_s: f64) -> Result<(), DriverError> {
        self.require_open("set_mark_speed")?;
        self.record(TraceEvent::SetMarkSpeed(mm_s));
        Ok(())
    }

    fn set_jump_speed(&mut self, mm_s: f64) -> Result<(), DriverError> {
        self.require_open("set_jump_speed")?;
        self.record(TraceEvent::SetJumpSpeed(mm_s));
        Ok(())
    }

    fn set_laser_power(&mut self, analog: u32) -> Result<(), DriverError> {
        self.require_open("set_laser_power")?;
        self.record(TraceEvent::SetPower(analog));
        Ok(())
    }

    fn jump_abs(&mut self, x: i32, y: i32) -> Result<(), DriverError> {
        self.queue("jump_abs", TraceEvent::Jump(x, y), 0)
    }

    fn mark_abs(&mut self, x: i32, y: i32) -> Result<(), DriverError> {
        self.queue("mark_abs", TraceEvent::Mark(x, y), 0)
    }

    fn list_delay(&mut self, ms: u32) -> Result<(), DriverError> {
        self.queue("list_delay", TraceEvent::Delay(ms), ms)
    }

    fn close_and_execute(&mut self) -> Result<(), DriverError> {
        self.require_open("close_and_execute")?;
        if !self.list_open {
            return Err(DriverError::Rejected {
                op: "close_and_execute",
                code: CODE_NO_LIST_OPEN,
            });
        }
        if self.reject_next_execute {
            self.reject_next_execute = false;
            return Err(DriverError::Rejected {
                op: "close_and_execute",
                code: CODE_INJECTED,
            });
        }

        let runtime = self.command_time * self.queued
            + Duration::from_millis(self.queued_delay_ms);
        self.busy_until = if self.never_complete {
            Some(Instant::now() + Duration::from_secs(86_400))
        } else {
            Some(Instant::now() + runtime)
        };

        self.record(TraceEvent::Execute(self.queued));
        self.list_open = false;
        self.queued = 0;
        self.queued_delay_ms = 0;
        Ok(())
    }

    fn busy(&mut self) -> Result<bool, DriverError> {
        self.require_open("busy")?;
        Ok(match self.busy_until {
            Some(until) => Instant::now() < until,
            None => false,
        })
    }

    fn laser_off(&mut self) -> Result<(), DriverError> {
        self.require_open("laser_off")?;
        self.record(TraceEvent::LaserOff);
        Ok(())
    }

    fn reset_error(&mut self) -> Result<(), DriverError> {
        self.require_open("reset_error")?;
        self.record(TraceEvent::ResetError);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.list_open = false;
            self.record(TraceEvent::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_sim() -> (SimGalvo, SimTraceHandle) {
        let (mut sim, trace) = SimGalvo::new();
        sim.open(&ScannerSettings::default()).unwrap();
        (sim, trace)
    }

    #[test]
    fn queue_without_list_is_rejected() {
        let (mut sim, _) = open_sim();
        let err = sim.jump_abs(0, 0).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Rejected {
                code: CODE_NO_LIST_OPEN,
                ..
            }
        ));
    }

    #[test]
    fn execution_takes_time_then_goes_idle() {
        let (sim, _) = SimGalvo::new();
        let mut sim = sim.with_command_time(Duration::from_millis(5));
        sim.open(&ScannerSettings::default()).unwrap();
        sim.begin_list().unwrap();
        sim.jump_abs(0, 0).unwrap();
        sim.mark_abs(10, 0).unwrap();
        sim.close_and_execute().unwrap();

        assert!(sim.busy().unwrap());
        std::thread::sleep(Duration::from_millis(25));
        assert!(!sim.busy().unwrap());
    }

    #[test]
    fn injected_command_rejection_fires_at_the_right_index() {
        let (sim, _) = SimGalvo::new();
        let mut sim = sim.reject_command_at(3);
        sim.open(&ScannerSettings::default()).unwrap();
        sim.begin_list().unwrap();
        sim.jump_abs(0, 0).unwrap();
        sim.mark_abs(1, 0).unwrap();
        let err = sim.jump_abs(2, 0).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Rejected {
                code: CODE_INJECTED,
                ..
            }
        ));
    }

    #[test]
    fn trace_records_the_call_sequence() {
        let (mut sim, trace) = open_sim();
        sim.begin_list().unwrap();
        sim.set_laser_power(640).unwrap();
        sim.jump_abs(1, 2).unwrap();
        sim.mark_abs(3, 4).unwrap();
        sim.close_and_execute().unwrap();
        sim.laser_off().unwrap();

        let trace = trace.lock().unwrap();
        assert_eq!(
            trace.commands(),
            vec![TraceEvent::Jump(1, 2), TraceEvent::Mark(3, 4)]
        );
        assert_eq!(trace.laser_off_count(), 1);
        assert_eq!(trace.execute_count(), 1);
        assert_eq!(trace.powers_applied(), vec![640]);
    }
}
