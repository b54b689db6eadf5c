//! Test-mode scenarios: synthetic layers, no PLC coupling, plus the
//! lifecycle behaviors that do not need a slice file.

mod common;

use common::{fast_config, recv_timeout, traced_driver_factory, MockPlc};
use marc_common::events::EventBus;
use marc_common::state::ProcessState;
use marc_control::ProcessController;
use marc_plc::PlcPort;
use marc_scanner::TraceEvent;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn test_controller() -> (ProcessController, EventBus, common::TraceSink) {
    let events = EventBus::new();
    let (factory, traces) = traced_driver_factory();
    let plc: Arc<dyn PlcPort> = Arc::new(MockPlc::new(events.clone(), Duration::from_millis(10)));
    let controller = ProcessController::with_ports(fast_config(), events.clone(), plc, factory);
    (controller, events, traces)
}

#[test]
fn single_empty_layer_observable_order() {
    let (controller, events, traces) = test_controller();

    let mut status = events.subscribe_status();
    let mut layers = events.subscribe_layer_executed();
    let mut progress = events.subscribe_progress();
    let mut finished = events.subscribe_finished();

    controller.start_test(0.2, 1).unwrap();

    let first_status = recv_timeout(&mut status, WAIT).expect("status message");
    assert_eq!(first_status, "starting");

    assert_eq!(recv_timeout(&mut layers, WAIT), Some(1));
    let update = recv_timeout(&mut progress, WAIT).expect("progress");
    assert_eq!((update.done, update.total), (1, 1));
    assert!(recv_timeout(&mut finished, WAIT).is_some());

    common::wait_for_state(&controller, ProcessState::Idle, Duration::from_secs(5));

    // Pilot marking: the laser power applied was zero and the square was
    // queued as one jump plus four marks.
    let traces = traces.lock().unwrap();
    let trace = traces[0].lock().unwrap();
    assert_eq!(trace.powers_applied(), vec![0]);
    let commands = trace.commands();
    assert_eq!(commands.len(), 5);
    assert!(matches!(commands[0], TraceEvent::Jump(..)));
    assert!(trace.laser_off_count() >= 1);
}

#[test]
fn multi_layer_test_run_counts_every_layer() {
    let (controller, events, _traces) = test_controller();
    let mut layers = events.subscribe_layer_executed();
    let mut finished = events.subscribe_finished();

    controller.start_test(0.1, 4).unwrap();
    assert!(recv_timeout(&mut finished, WAIT).is_some());

    let mut executed = Vec::new();
    while let Some(n) = recv_timeout(&mut layers, Duration::from_millis(100)) {
        executed.push(n);
    }
    assert_eq!(executed, vec![1, 2, 3, 4]);
}

#[test]
fn stop_joins_all_tasks_and_returns_to_idle() {
    let (controller, events, _traces) = test_controller();
    let mut layers = events.subscribe_layer_executed();

    controller.start_test(0.2, 100).unwrap();
    assert!(recv_timeout(&mut layers, WAIT).is_some());

    controller.stop().unwrap();
    assert_eq!(controller.current_state(), ProcessState::Idle);

    // A second stop is benign.
    controller.stop().unwrap();
}

#[test]
fn pause_holds_layers_and_resume_continues() {
    // Slow the per-layer settle gap so the pause lands between layers.
    let mut config = fast_config();
    config.scanner.settle_delay_ms = 50;

    let events = EventBus::new();
    let (factory, _traces) = traced_driver_factory();
    let plc: Arc<dyn PlcPort> = Arc::new(MockPlc::new(events.clone(), Duration::from_millis(10)));
    let controller = ProcessController::with_ports(config, events.clone(), plc, factory);

    let mut layers = events.subscribe_layer_executed();
    let mut finished = events.subscribe_finished();

    controller.start_test(0.2, 3).unwrap();
    assert!(recv_timeout(&mut layers, WAIT).is_some());

    controller.pause().unwrap();
    assert_eq!(controller.current_state(), ProcessState::Paused);

    // While paused no new layer completes beyond the one that may already
    // have been in flight.
    std::thread::sleep(Duration::from_millis(150));
    let during_pause = common::drain(&mut layers).len();
    assert!(during_pause <= 1, "{during_pause} layers executed while paused");

    controller.resume().unwrap();
    assert!(recv_timeout(&mut finished, WAIT).is_some());
    common::wait_for_state(&controller, ProcessState::Idle, Duration::from_secs(5));
}

#[test]
fn invalid_test_arguments_are_refused() {
    let (controller, _events, _traces) = test_controller();
    assert!(controller.start_test(0.0, 1).is_err());
    assert!(controller.start_test(0.9, 1).is_err());
    assert!(controller.start_test(0.2, 0).is_err());
    assert!(controller.start_test(0.2, 101).is_err());
    assert_eq!(controller.current_state(), ProcessState::Idle);
}

#[test]
fn lifecycle_transitions_are_guarded() {
    let (controller, events, _traces) = test_controller();

    // Nothing to pause, resume or stop while idle.
    assert!(controller.pause().is_err());
    assert!(controller.resume().is_err());
    assert!(controller.emergency_stop().is_err());

    let mut finished = events.subscribe_finished();
    controller.start_test(0.2, 1).unwrap();

    // Double start while a run is active is refused.
    assert!(controller.start_test(0.2, 1).is_err());

    assert!(recv_timeout(&mut finished, WAIT).is_some());
    common::wait_for_state(&controller, ProcessState::Idle, Duration::from_secs(5));

    // After the run drained, a fresh start succeeds.
    let mut finished = events.subscribe_finished();
    controller.start_test(0.2, 1).unwrap();
    assert!(recv_timeout(&mut finished, WAIT).is_some());
}
