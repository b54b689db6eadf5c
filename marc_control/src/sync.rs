//! The shared synchronization core of the scheduler.
//!
//! One mutex guards the bounded block queue and the handshake latches; four
//! condition variables carry the wakeups. Control flags are atomics so any
//! task can check them without the lock. Every notify is a broadcast and
//! every waiter re-evaluates its predicate, so spurious wakeups are
//! harmless.

use marc_slice::RtcCommandBlock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Smallest settable queue capacity.
pub const MIN_QUEUE_CAPACITY: usize = 2;
/// Largest settable queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 10;

/// Per-run progress counters, shared by all tasks.
#[derive(Debug, Default)]
pub struct RunCounters {
    /// Total layers in this run (known once the producer opened its input).
    pub total_layers: AtomicU32,
    /// Layers pushed by the producer.
    pub layers_produced: AtomicU32,
    /// Layers fully executed by the consumer.
    pub layers_consumed: AtomicU32,
}

impl RunCounters {
    /// Total layers, 0 while unknown.
    pub fn total(&self) -> u32 {
        self.total_layers.load(Ordering::SeqCst)
    }

    /// Layers fully executed.
    pub fn consumed(&self) -> u32 {
        self.layers_consumed.load(Ordering::SeqCst)
    }
}

/// Result of a consumer pop.
#[derive(Debug)]
pub enum PopResult {
    /// A block to execute.
    Block(Box<RtcCommandBlock>),
    /// Stop or emergency was requested.
    Stopped,
    /// Producer finished and the queue is empty.
    Drained,
}

#[derive(Debug)]
struct Shared {
    queue: VecDeque<Box<RtcCommandBlock>>,
    capacity: usize,
    layer_requested: bool,
    plc_layer_ready: bool,
    paused: bool,
}

/// Queue, latches and condition variables shared by the scheduler tasks.
#[derive(Debug)]
pub struct SyncCore {
    shared: Mutex<Shared>,
    not_empty: Condvar,
    not_full: Condvar,
    layer_requested: Condvar,
    plc_ready: Condvar,
    stop_requested: AtomicBool,
    emergency: AtomicBool,
    producer_finished: AtomicBool,
}

impl SyncCore {
    /// Create a core with the given queue capacity (1 = single-piece flow).
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                queue: VecDeque::new(),
                capacity: capacity.max(1),
                layer_requested: false,
                plc_layer_ready: false,
                paused: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            layer_requested: Condvar::new(),
            plc_ready: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            emergency: AtomicBool::new(false),
            producer_finished: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_all_waiters(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.layer_requested.notify_all();
        self.plc_ready.notify_all();
    }

    // ── Capacity ──

    /// Reconfigure the queue bound. Values are clamped to
    /// `[MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY]`.
    pub fn set_capacity(&self, capacity: usize) {
        let clamped = capacity.clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY);
        self.lock().capacity = clamped;
        self.not_full.notify_all();
    }

    /// Current queue bound.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Current queue length.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    // ── Control flags ──

    /// Request a graceful stop and wake every waiter.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.notify_all_waiters();
    }

    /// Request an emergency stop (implies stop) and wake every waiter.
    pub fn request_emergency(&self) {
        self.emergency.store(true, Ordering::SeqCst);
        self.request_stop();
    }

    /// Whether stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Whether emergency stop was requested.
    pub fn emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    /// Mark the producer as finished and wake the consumer.
    pub fn set_producer_finished(&self) {
        self.producer_finished.store(true, Ordering::SeqCst);
        self.not_empty.notify_all();
    }

    /// Whether the producer has finished.
    pub fn producer_finished(&self) -> bool {
        self.producer_finished.load(Ordering::SeqCst)
    }

    // ── Pause ──

    /// Pause or resume the run between layers.
    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
        // The consumer re-checks its pop predicate; a resume must wake it.
        self.not_empty.notify_all();
    }

    /// Whether the run is paused.
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    // ── Queue ──

    /// Push a block, blocking while the queue is full.
    ///
    /// Returns `false` if stop was requested while waiting.
    pub fn push_block(&self, block: RtcCommandBlock) -> bool {
        let mut shared = self.lock();
        while shared.queue.len() >= shared.capacity && !self.stop_requested() {
            shared = self
                .not_full
                .wait(shared)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if self.stop_requested() {
            return false;
        }
        shared.queue.push_back(Box::new(block));
        drop(shared);
        self.not_empty.notify_all();
        true
    }

    /// Pop the next block, blocking until one is available, the producer
    /// drains, or stop is requested. Also blocks while paused.
    pub fn pop_block(&self) -> PopResult {
        let mut shared = self.lock();
        loop {
            if self.stop_requested() {
                return PopResult::Stopped;
            }
            if !shared.paused {
                if let Some(block) = shared.queue.pop_front() {
                    drop(shared);
                    self.not_full.notify_all();
                    return PopResult::Block(block);
                }
                if self.producer_finished() {
                    return PopResult::Drained;
                }
            }
            shared = self
                .not_empty
                .wait(shared)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    // ── Layer request (pull signal) ──

    /// Signal the producer to produce the next layer.
    pub fn signal_layer_requested(&self) {
        self.lock().layer_requested = true;
        self.layer_requested.notify_all();
    }

    /// Producer side: block until a layer is requested, consuming the
    /// request. Returns `false` if stop was requested.
    pub fn wait_layer_request(&self) -> bool {
        let mut shared = self.lock();
        while !shared.layer_requested && !self.stop_requested() {
            shared = self
                .layer_requested
                .wait(shared)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if self.stop_requested() {
            return false;
        }
        shared.layer_requested = false;
        true
    }

    // ── PLC ready latch ──

    /// Signal that the PLC reports the layer surface prepared.
    pub fn signal_plc_ready(&self) {
        self.lock().plc_layer_ready = true;
        self.plc_ready.notify_all();
    }

    /// Consumer side: block until the PLC ready latch is set, rearming it.
    /// Returns `false` if stop was requested.
    pub fn wait_plc_ready(&self) -> bool {
        let mut shared = self.lock();
        while !shared.plc_layer_ready && !self.stop_requested() {
            shared = self
                .plc_ready
                .wait(shared)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if self.stop_requested() {
            return false;
        }
        shared.plc_layer_ready = false;
        true
    }
}
