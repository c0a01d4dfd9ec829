/// Canonical names for process values shared by the transports and the
/// metrics exporter.
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
}

pub const BEAM_POSITION_MM: Tag = Tag {
    key: "pos",
    metric: "beamline_beam_position_mm",
};

pub const BEAM_INTENSITY: Tag = Tag {
    key: "intensity",
    metric: "beamline_beam_intensity",
};

pub const MAGNET_CURRENT_A: Tag = Tag {
    key: "mag",
    metric: "beamline_magnet_current_amps",
};

pub const LOOP_TIME_US: Tag = Tag {
    key: "loop_time_us",
    metric: "beamline_loop_time_microseconds",
};

pub const DEADLINE_MISSES: Tag = Tag {
    key: "deadline_misses",
    metric: "beamline_deadline_misses_total",
};

pub const CYCLES: Tag = Tag {
    key: "cycle",
    metric: "beamline_cycles_total",
};

pub const MPS_ABORTS: Tag = Tag {
    key: "abort_count",
    metric: "beamline_mps_aborts_total",
};
