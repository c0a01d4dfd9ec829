use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of the loop state as reported to operators, published once
/// per iteration for any-thread readers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusSnapshot {
    pub hz: f64,
    pub cycle: u64,
    pub deadline_misses: u64,
    pub control_enabled: bool,
    pub emergency_stop: bool,
    pub beam_permit: bool,
    pub abort_latched: bool,
    pub abort_count: u64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    pub integrator: f64,
    pub avg_loop_time_us: f64,
    pub max_loop_time_us: f64,
}

/// Wait-free single-writer/multi-reader slot. The writer rotates through
/// three buffers and publishes the index with release ordering; readers
/// always observe the most recently completed write.
struct TripleBuffer<T: Copy + Default> {
    slots: [UnsafeCell<T>; 3],
    published: AtomicUsize,
}

unsafe impl<T: Copy + Default + Send> Send for TripleBuffer<T> {}
unsafe impl<T: Copy + Default + Sync> Sync for TripleBuffer<T> {}

impl<T: Copy + Default> TripleBuffer<T> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| UnsafeCell::new(T::default())),
            published: AtomicUsize::new(0),
        }
    }

    fn write(&self, value: T) {
        let current = self.published.load(Ordering::Relaxed);
        let next = (current + 1) % 3;
        unsafe {
            *self.slots[next].get() = value;
        }
        self.published.store(next, Ordering::Release);
    }

    fn read(&self) -> T {
        let index = self.published.load(Ordering::Acquire);
        unsafe { *self.slots[index].get() }
    }
}

/// Status hand-off between the loop thread and observers (metrics
/// exporter, shutdown report). Non-blocking on both sides.
pub struct StatusExchange {
    status: TripleBuffer<StatusSnapshot>,
}

impl StatusExchange {
    pub fn new() -> Self {
        Self {
            status: TripleBuffer::new(),
        }
    }

    /// Called by the loop thread every cycle.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.status.write(snapshot);
    }

    /// Latest completed snapshot; the default value before the first publish.
    pub fn read(&self) -> StatusSnapshot {
        self.status.read()
    }
}

impl Default for StatusExchange {
    fn default() -> Self {
        Self::new()
    }
}
