use beam_core::{Command, Reply, StatusSnapshot, TelemetryRecord};
use serde::Serialize;
use serde_json::{json, Value};

/// Decode one command line. Decode failures are folded into
/// `Command::Invalid` so the loop can keep its one-reply-per-request
/// discipline for malformed traffic too.
pub fn parse_command(line: &str) -> Command {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            return Command::Invalid {
                reason: "invalid JSON".to_string(),
            }
        }
    };

    if !value.is_object() {
        return Command::Invalid {
            reason: "invalid command format".to_string(),
        };
    }

    let cmd = match value.get("cmd").and_then(Value::as_str) {
        Some(cmd) => cmd,
        None => {
            return Command::Invalid {
                reason: "missing cmd".to_string(),
            }
        }
    };

    match cmd {
        "set_pid" => Command::SetPid {
            kp: value.get("kp").and_then(Value::as_f64),
            ki: value.get("ki").and_then(Value::as_f64),
            kd: value.get("kd").and_then(Value::as_f64),
        },
        "set_freq" => match value.get("hz").and_then(Value::as_f64) {
            Some(hz) => Command::SetFreq { hz },
            None => Command::Invalid {
                reason: "missing field: hz".to_string(),
            },
        },
        "set_setpoint" => match value.get("sp").and_then(Value::as_f64) {
            Some(sp) => Command::SetSetpoint { sp },
            None => Command::Invalid {
                reason: "missing field: sp".to_string(),
            },
        },
        "recommission" => Command::Recommission,
        "emergency_stop" => Command::EmergencyStop,
        "enable_control" => Command::EnableControl {
            enable: value.get("enable").and_then(Value::as_bool).unwrap_or(true),
        },
        "get_status" => Command::GetStatus,
        "stop" => Command::Stop,
        other => Command::Invalid {
            reason: format!("unknown cmd: {other}"),
        },
    }
}

pub fn status_to_json(status: &StatusSnapshot) -> Value {
    json!({
        "ok": true,
        "hz": status.hz,
        "cycle": status.cycle,
        "deadline_misses": status.deadline_misses,
        "control_enabled": status.control_enabled,
        "emergency_stop": status.emergency_stop,
        "mps_safe": status.beam_permit,
        "mps_abort": status.abort_latched,
        "abort_count": status.abort_count,
        "pid_gains": {
            "kp": status.kp,
            "ki": status.ki,
            "kd": status.kd,
        },
        "setpoint": status.setpoint,
        "integrator": status.integrator,
        "avg_loop_time_us": status.avg_loop_time_us,
        "max_loop_time_us": status.max_loop_time_us,
    })
}

pub fn reply_to_json(reply: &Reply) -> String {
    let value = match reply {
        Reply::Ok => json!({ "ok": true }),
        Reply::Rejected { error } => json!({ "ok": false, "error": error }),
        Reply::Status(status) => status_to_json(status),
    };
    value.to_string()
}

#[derive(Debug, Serialize)]
pub struct TelemetryMsg {
    pub t: f64,
    pub pos: f64,
    pub intensity: f64,
    pub mag: f64,
    pub deadline_miss: u8,
    pub mps_safe: bool,
    pub mps_abort: bool,
    pub cycle: u64,
    pub loop_time_us: u32,
    pub pid_p: f64,
    pub pid_i: f64,
    pub pid_d: f64,
    pub control_enabled: bool,
    pub emergency_stop: bool,
}

impl From<&TelemetryRecord> for TelemetryMsg {
    fn from(record: &TelemetryRecord) -> Self {
        Self {
            t: record.t,
            pos: record.pos,
            intensity: record.intensity,
            mag: record.mag,
            deadline_miss: record.deadline_miss.into(),
            mps_safe: record.mps_safe,
            mps_abort: record.mps_abort,
            cycle: record.cycle,
            loop_time_us: record.loop_time_us,
            pid_p: record.pid_p,
            pid_i: record.pid_i,
            pid_d: record.pid_d,
            control_enabled: record.control_enabled,
            emergency_stop: record.emergency_stop,
        }
    }
}

pub fn telemetry_to_json(record: &TelemetryRecord) -> String {
    serde_json::to_string(&TelemetryMsg::from(record)).unwrap_or_default()
}
