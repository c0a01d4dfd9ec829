//! Real-time setup for the loop thread, performed in order before the
//! first iteration:
//!
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` — no paging under the loop.
//! 2. Prefault the stack.
//! 3. `sched_setaffinity` — pin to one CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO)` — fixed real-time priority.
//!
//! Everything is best-effort: the loop stays correct at default priority,
//! it just cannot guarantee its jitter target. Without the `rt` cargo
//! feature all steps are no-ops.

use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct RtConfig {
    /// CPU core to pin the loop thread to; `None` picks the last core.
    pub cpu_core: Option<usize>,
    /// SCHED_FIFO priority (1-99).
    pub priority: i32,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu_core: None,
            priority: 50,
        }
    }
}

/// Outcome of the setup sequence. `acquired` is true only when the
/// real-time scheduling policy is in effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtStatus {
    pub acquired: bool,
    pub memory_locked: bool,
    pub cpu_pinned: bool,
}

/// Touch a block of stack so its pages are resident before the loop
/// starts.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        unsafe { std::ptr::write_volatile(byte, 0xFF) };
    }
    std::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn lock_memory() -> Result<(), String> {
    use nix::sys::mman::{mlockall, MlockAllFlags};
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| format!("mlockall failed: {e}"))
}

#[cfg(feature = "rt")]
fn pin_cpu(core: usize) -> Result<(), String> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(core)
        .map_err(|e| format!("CpuSet::set({core}) failed: {e}"))?;
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| format!("sched_setaffinity failed: {e}"))
}

#[cfg(feature = "rt")]
fn set_fifo_priority(priority: i32) -> Result<(), String> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        ));
    }
    Ok(())
}

#[cfg(feature = "rt")]
pub fn init_realtime(config: RtConfig) -> RtStatus {
    let mut status = RtStatus::default();

    match lock_memory() {
        Ok(()) => status.memory_locked = true,
        Err(err) => tracing::warn!(%err, "could not lock memory"),
    }

    prefault_stack();

    let core = config
        .cpu_core
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(0, |n| n.get() - 1));
    match pin_cpu(core) {
        Ok(()) => {
            status.cpu_pinned = true;
            info!(core, "loop thread pinned");
        }
        Err(err) => tracing::warn!(%err, "could not set CPU affinity"),
    }

    match set_fifo_priority(config.priority) {
        Ok(()) => {
            status.acquired = true;
            info!(priority = config.priority, "real-time scheduling enabled");
        }
        Err(err) => tracing::warn!(%err, "could not enable real-time scheduling"),
    }

    status
}

#[cfg(not(feature = "rt"))]
pub fn init_realtime(_config: RtConfig) -> RtStatus {
    prefault_stack();
    info!("real-time setup skipped (built without the 'rt' feature)");
    RtStatus::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_is_best_effort() {
        // Must never panic, whatever privileges the test runs with.
        let status = init_realtime(RtConfig::default());
        #[cfg(not(feature = "rt"))]
        assert!(!status.acquired);
        let _ = status;
    }
}
