/// One telemetry sample per control iteration, reflecting state after the
/// actuator phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryRecord {
    /// Seconds since loop start (monotonic).
    pub t: f64,
    pub cycle: u64,
    pub pos: f64,
    pub intensity: f64,
    /// Last actuator command.
    pub mag: f64,
    pub deadline_miss: bool,
    /// Beam permitted by machine protection.
    pub mps_safe: bool,
    /// Machine-protection abort latched.
    pub mps_abort: bool,
    pub loop_time_us: u32,
    pub pid_p: f64,
    pub pid_i: f64,
    pub pid_d: f64,
    pub control_enabled: bool,
    pub emergency_stop: bool,
}

/// Fire-and-forget telemetry channel. `publish` must not block the
/// caller; when the underlying buffer is full the record is dropped —
/// deadline integrity takes precedence over delivery completeness.
pub trait TelemetrySink {
    fn publish(&self, record: TelemetryRecord);
}
