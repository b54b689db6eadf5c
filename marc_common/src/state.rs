//! Process lifecycle state machine.
//!
//! Global run lifecycle: Idle → Starting → Running ↔ Paused → Stopping → Idle,
//! with EmergencyStopped as the terminal failure state. Transitions not in the
//! table are refused with a reason; the machine never panics on bad input.

/// Finite process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No run active; ready to start.
    Idle,
    /// PLC connecting / worker threads spawning.
    Starting,
    /// Layers are being produced and executed.
    Running,
    /// Run suspended between layers.
    Paused,
    /// Stop requested; tasks draining and joining.
    Stopping,
    /// Emergency stop taken — terminal for this controller instance.
    EmergencyStopped,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProcessState::Idle => "idle",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Paused => "paused",
            ProcessState::Stopping => "stopping",
            ProcessState::EmergencyStopped => "emergency-stopped",
        };
        write!(f, "{label}")
    }
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded — new state.
    Ok(ProcessState),
    /// Transition rejected — reason.
    Rejected(&'static str),
}

/// Lifecycle event that can trigger a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A production or test run was requested.
    Start,
    /// PLC session established and ready (or not needed in test mode).
    PlcReady,
    /// Startup failed before the run went live (PLC connect/readiness or
    /// configuration loading).
    StartFailed,
    /// Pause requested by the operator.
    Pause,
    /// Resume requested by the operator.
    Resume,
    /// All layers executed; run finished normally.
    BuildComplete,
    /// Stop requested (operator action or a fatal run error).
    Stop,
    /// All worker tasks drained and joined.
    StopComplete,
    /// Emergency stop requested.
    EmergencyStop,
}

/// Process state machine holding the current lifecycle state.
#[derive(Debug, Clone)]
pub struct ProcessStateMachine {
    state: ProcessState,
}

impl Default for ProcessStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStateMachine {
    /// Create a new machine in `Idle`.
    pub const fn new() -> Self {
        Self {
            state: ProcessState::Idle,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether a run can currently be started.
    #[inline]
    pub const fn can_start(&self) -> bool {
        matches!(self.state, ProcessState::Idle)
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: ProcessEvent) -> TransitionResult {
        use ProcessEvent::*;
        use ProcessState::*;

        let next = match (self.state, event) {
            (Idle, Start) => Starting,

            (Starting, PlcReady) => Running,
            (Starting, StartFailed) => Idle,

            (Running, Pause) => Paused,
            (Paused, Resume) => Running,

            (Running, BuildComplete) => Idle,

            (Starting, Stop) | (Running, Stop) | (Paused, Stop) => Stopping,
            (Stopping, StopComplete) => Idle,

            // Emergency is accepted from every active state; Idle has nothing
            // to stop and EmergencyStopped is already terminal.
            (Starting, EmergencyStop)
            | (Running, EmergencyStop)
            | (Paused, EmergencyStop)
            | (Stopping, EmergencyStop) => EmergencyStopped,

            (EmergencyStopped, _) => {
                return TransitionResult::Rejected(
                    "emergency-stopped is terminal; recreate the controller",
                );
            }
            _ => {
                return TransitionResult::Rejected(invalid_transition_reason(self.state, event));
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }
}

fn invalid_transition_reason(state: ProcessState, event: ProcessEvent) -> &'static str {
    use ProcessEvent::*;
    use ProcessState::*;
    match (state, event) {
        (Idle, EmergencyStop) => "nothing to stop while idle",
        (Idle, _) => "idle: only start is allowed",
        (Starting, _) => "starting: only plc-ready, plc-error, stop or emergency",
        (Running, Start) => "a run is already active",
        (Running, _) => "running: invalid event for current state",
        (Paused, _) => "paused: only resume, stop or emergency",
        (Stopping, _) => "stopping: wait for tasks to drain",
        (EmergencyStopped, _) => "emergency-stopped is terminal",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
