//! The control surface.
//!
//! `ProcessController` is the only type external collaborators touch. It
//! owns the lifecycle state machine, spawns and joins the worker tasks
//! (consumer → producer → poller), and exposes the observation channels.
//!
//! Thread lifecycle per run: the consumer starts first and owns the scanner
//! for the whole run; the producer streams behind it under the pull
//! protocol; the poller mirrors PLC state. `stop()` returns only after
//! every task handle is joined and the queue is dropped.

use crate::consumer::{run_consumer, ConsumerContext};
use crate::error::ControlError;
use crate::poller::run_poller;
use crate::producer::{run_file_producer, run_test_producer, ProducerContext};
use crate::sync::{RunCounters, SyncCore};
use marc_common::config::MachineConfig;
use marc_common::events::EventBus;
use marc_common::state::{ProcessEvent, ProcessState, ProcessStateMachine, TransitionResult};
use marc_plc::{PlcClient, PlcPort};
use marc_scanner::{GalvoDriver, SimGalvo};
use marc_slice::{BuildStyleLibrary, Calibration};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// Factory for the galvo driver backend a run's consumer will own.
pub type DriverFactory = Box<dyn Fn() -> Box<dyn GalvoDriver> + Send + Sync>;

struct ActiveRun {
    sync: Arc<SyncCore>,
    #[allow(dead_code)]
    counters: Arc<RunCounters>,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    machine: ProcessStateMachine,
    run: Option<ActiveRun>,
}

/// The stable API exposed to external collaborators.
pub struct ProcessController {
    config: MachineConfig,
    events: EventBus,
    plc: Arc<dyn PlcPort>,
    driver_factory: DriverFactory,
    polling_interval_ms: Arc<AtomicU64>,
    inner: Mutex<Inner>,
}

impl ProcessController {
    /// Controller against a real PLC client and the simulation galvo
    /// driver.
    pub fn new(config: MachineConfig) -> Self {
        let events = EventBus::new();
        let plc: Arc<dyn PlcPort> = Arc::new(PlcClient::new(config.plc.clone(), events.clone()));
        let driver_factory: DriverFactory = Box::new(|| Box::new(SimGalvo::new().0));
        Self::with_ports(config, events, plc, driver_factory)
    }

    /// Controller with injected PLC port and driver backend.
    pub fn with_ports(
        config: MachineConfig,
        events: EventBus,
        plc: Arc<dyn PlcPort>,
        driver_factory: DriverFactory,
    ) -> Self {
        let polling_interval_ms = Arc::new(AtomicU64::new(config.process.polling_interval_ms));
        Self {
            config,
            events,
            plc,
            driver_factory,
            polling_interval_ms,
            inner: Mutex::new(Inner {
                machine: ProcessStateMachine::new(),
                run: None,
            }),
        }
    }

    /// The observation channels.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current lifecycle state.
    pub fn current_state(&self) -> ProcessState {
        let mut inner = self.lock();
        self.reconcile(&mut inner);
        inner.machine.state()
    }

    /// Reconfigure the PLC polling interval [ms].
    pub fn set_polling_interval(&self, milliseconds: u64) {
        self.polling_interval_ms
            .store(milliseconds.max(50), Ordering::SeqCst);
    }

    /// Start a slice-file-driven production run.
    ///
    /// Startup order: parameter library, PLC session, PLC readiness, then
    /// consumer → producer → poller.
    pub fn start_production(
        &self,
        slice_path: impl Into<PathBuf>,
        style_path: impl Into<PathBuf>,
    ) -> Result<(), ControlError> {
        let slice_path = slice_path.into();
        let style_path = style_path.into();

        {
            let mut inner = self.lock();
            self.reconcile(&mut inner);
            self.transition(&mut inner, ProcessEvent::Start)?;
        }
        self.events.status("starting");

        // Startup work happens without the controller lock so observers
        // stay responsive; failure rolls the machine back to idle.
        match self.production_startup(&slice_path, &style_path) {
            Ok(run) => {
                let mut inner = self.lock();
                match self.transition(&mut inner, ProcessEvent::PlcReady) {
                    Ok(_) => {
                        inner.run = Some(run);
                        self.events.status("production run active");
                        Ok(())
                    }
                    Err(e) => {
                        // A stop raced the startup; tear the fresh run down.
                        drop(inner);
                        abandon_run(run);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.events.error(e.report());
                let mut inner = self.lock();
                let _ = self.transition(&mut inner, ProcessEvent::StartFailed);
                Err(e)
            }
        }
    }

    fn production_startup(
        &self,
        slice_path: &PathBuf,
        style_path: &PathBuf,
    ) -> Result<ActiveRun, ControlError> {
        let styles = Arc::new(BuildStyleLibrary::load_from_json(style_path)?);
        self.events
            .status(format!("{} build styles loaded", styles.len()));

        self.plc.connect()?;
        self.plc
            .wait_until_ready(Duration::from_millis(self.config.plc.ready_timeout_ms))?;
        self.events.status("PLC session ready");

        let sync = self.new_sync_core();
        let counters = Arc::new(RunCounters::default());
        let calibration = self.calibration();
        let mut handles = Vec::with_capacity(3);

        let spawn_result = (|| -> Result<(), ControlError> {
            // Consumer first: it owns the scanner and primes the pull
            // protocol.
            let consumer_ctx = ConsumerContext {
                sync: Arc::clone(&sync),
                events: self.events.clone(),
                counters: Arc::clone(&counters),
                plc: Some(Arc::clone(&self.plc)),
                settings: self.config.scanner.clone(),
                stacks_policy: self.config.process.layer_stacks_policy,
            };
            let driver = (self.driver_factory)();
            handles.push(spawn_task("consumer", move || {
                run_consumer(consumer_ctx, driver)
            })?);

            let producer_ctx = ProducerContext {
                sync: Arc::clone(&sync),
                events: self.events.clone(),
                counters: Arc::clone(&counters),
            };
            let producer_path = slice_path.clone();
            handles.push(spawn_task("producer", move || {
                run_file_producer(producer_ctx, producer_path, styles, calibration)
            })?);

            let poller_sync = Arc::clone(&sync);
            let poller_events = self.events.clone();
            let poller_plc = Arc::clone(&self.plc);
            let poller_interval = Arc::clone(&self.polling_interval_ms);
            handles.push(spawn_task("opc-poller", move || {
                run_poller(poller_sync, poller_events, poller_plc, poller_interval)
            })?);
            Ok(())
        })();

        if let Err(e) = spawn_result {
            sync.request_stop();
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
            return Err(e);
        }

        Ok(ActiveRun {
            sync,
            counters,
            handles,
        })
    }

    /// Start a synthetic test run (no slice file, no PLC coupling).
    pub fn start_test(&self, thickness_mm: f32, layer_count: u32) -> Result<(), ControlError> {
        if !(thickness_mm > 0.0 && thickness_mm <= 0.5) {
            return Err(ControlError::InvalidArgument(format!(
                "test layer thickness must be in (0, 0.5] mm, got {thickness_mm}"
            )));
        }
        if !(1..=100).contains(&layer_count) {
            return Err(ControlError::InvalidArgument(format!(
                "test layer count must be 1..=100, got {layer_count}"
            )));
        }

        {
            let mut inner = self.lock();
            self.reconcile(&mut inner);
            self.transition(&mut inner, ProcessEvent::Start)?;
        }
        self.events.status("starting");

        let sync = self.new_sync_core();
        let counters = Arc::new(RunCounters::default());
        let calibration = self.calibration();
        let mut handles = Vec::with_capacity(2);

        let consumer_ctx = ConsumerContext {
            sync: Arc::clone(&sync),
            events: self.events.clone(),
            counters: Arc::clone(&counters),
            plc: None,
            settings: self.config.scanner.clone(),
            stacks_policy: self.config.process.layer_stacks_policy,
        };
        let driver = (self.driver_factory)();
        let consumer = spawn_task("consumer", move || run_consumer(consumer_ctx, driver));

        let producer_ctx = ProducerContext {
            sync: Arc::clone(&sync),
            events: self.events.clone(),
            counters: Arc::clone(&counters),
        };
        let producer = spawn_task("test-producer", move || {
            run_test_producer(producer_ctx, thickness_mm, layer_count, calibration)
        });

        match (consumer, producer) {
            (Ok(c), Ok(p)) => {
                handles.push(c);
                handles.push(p);
            }
            (c, p) => {
                sync.request_stop();
                for handle in [c, p].into_iter().flatten() {
                    let _ = handle.join();
                }
                let mut inner = self.lock();
                let _ = self.transition(&mut inner, ProcessEvent::StartFailed);
                return Err(ControlError::Internal("task spawn failed".to_string()));
            }
        }

        let run = ActiveRun {
            sync,
            counters,
            handles,
        };
        let mut inner = self.lock();
        match self.transition(&mut inner, ProcessEvent::PlcReady) {
            Ok(_) => {
                inner.run = Some(run);
                self.events
                    .status(format!("test run active: {layer_count} layers, laser off"));
                Ok(())
            }
            Err(e) => {
                drop(inner);
                abandon_run(run);
                Err(e)
            }
        }
    }

    /// Pause the run between layers.
    pub fn pause(&self) -> Result<(), ControlError> {
        let mut inner = self.lock();
        self.reconcile(&mut inner);
        self.transition(&mut inner, ProcessEvent::Pause)?;
        if let Some(run) = &inner.run {
            run.sync.set_paused(true);
        }
        self.events.status("process paused");
        Ok(())
    }

    /// Resume a paused run.
    pub fn resume(&self) -> Result<(), ControlError> {
        let mut inner = self.lock();
        self.reconcile(&mut inner);
        self.transition(&mut inner, ProcessEvent::Resume)?;
        if let Some(run) = &inner.run {
            run.sync.set_paused(false);
        }
        self.events.status("process resumed");
        Ok(())
    }

    /// Stop gracefully: every task drains and is joined before this
    /// returns.
    pub fn stop(&self) -> Result<(), ControlError> {
        let mut inner = self.lock();
        self.reconcile(&mut inner);

        if inner.machine.state() == ProcessState::Idle {
            self.events.status("process already stopped");
            return Ok(());
        }
        self.transition(&mut inner, ProcessEvent::Stop)?;

        if let Some(mut run) = inner.run.take() {
            run.sync.set_paused(false);
            run.sync.request_stop();
            for handle in run.handles.drain(..) {
                let _ = handle.join();
            }
        }
        self.transition(&mut inner, ProcessEvent::StopComplete)?;
        self.events.status("process stopped, all tasks joined");
        Ok(())
    }

    /// Emergency stop: abort in-flight work, laser dark, PLC told to stop.
    ///
    /// Terminal for this controller; a new controller is needed for the
    /// next run.
    pub fn emergency_stop(&self) -> Result<(), ControlError> {
        let mut inner = self.lock();
        self.reconcile(&mut inner);
        self.transition(&mut inner, ProcessEvent::EmergencyStop)?;

        if let Some(run) = &inner.run {
            run.sync.set_paused(false);
            run.sync.request_emergency();
        }
        // Best effort and always logged, whatever the connection state.
        let _ = self.plc.write_emergency_stop();

        if let Some(mut run) = inner.run.take() {
            for handle in run.handles.drain(..) {
                let _ = handle.join();
            }
        }
        self.events
            .status("EMERGENCY STOP: laser disabled, all operations halted");
        Ok(())
    }

    // ── Internal ──

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn calibration(&self) -> Calibration {
        Calibration {
            field_size_mm: self.config.scanner.field_size_mm,
            max_bits: self.config.scanner.max_bits,
            scale_correction: self.config.scanner.scale_correction,
        }
    }

    fn new_sync_core(&self) -> Arc<SyncCore> {
        let sync = Arc::new(SyncCore::new(1));
        if self.config.process.queue_capacity != 1 {
            sync.set_capacity(self.config.process.queue_capacity);
        }
        sync
    }

    fn transition(
        &self,
        inner: &mut Inner,
        event: ProcessEvent,
    ) -> Result<ProcessState, ControlError> {
        match inner.machine.handle_event(event) {
            TransitionResult::Ok(state) => {
                self.events.state_changed(state);
                tracing::info!("process state: {state}");
                Ok(state)
            }
            TransitionResult::Rejected(reason) => Err(ControlError::InvalidTransition(reason)),
        }
    }

    /// Fold finished worker tasks back into the lifecycle state.
    fn reconcile(&self, inner: &mut Inner) {
        let all_done = inner
            .run
            .as_ref()
            .is_some_and(|run| run.handles.iter().all(|h| h.is_finished()));
        if !all_done {
            return;
        }
        if let Some(mut run) = inner.run.take() {
            for handle in run.handles.drain(..) {
                let _ = handle.join();
            }
        }
        match inner.machine.state() {
            ProcessState::Running => {
                let _ = self.transition(inner, ProcessEvent::BuildComplete);
            }
            ProcessState::Stopping => {
                let _ = self.transition(inner, ProcessEvent::StopComplete);
            }
            _ => {}
        }
    }
}

fn spawn_task(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, ControlError> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| ControlError::Internal(format!("cannot spawn {name} task: {e}")))
}

/// Stop and join a run that never made it into the controller.
fn abandon_run(mut run: ActiveRun) {
    run.sync.request_stop();
    for handle in run.handles.drain(..) {
        let _ = handle.join();
    }
}
