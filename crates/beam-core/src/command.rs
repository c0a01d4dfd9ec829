use crate::sync::StatusSnapshot;

/// Operator command, already decoded from the wire by the transport
/// collaborator. Payloads that failed to decode arrive as `Invalid` so the
/// one-reply-per-request discipline holds for them too.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetPid {
        kp: Option<f64>,
        ki: Option<f64>,
        kd: Option<f64>,
    },
    SetFreq {
        hz: f64,
    },
    SetSetpoint {
        sp: f64,
    },
    Recommission,
    EmergencyStop,
    EnableControl {
        enable: bool,
    },
    GetStatus,
    Stop,
    Invalid {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Rejected { error: String },
    Status(StatusSnapshot),
}

impl Reply {
    pub fn rejected(error: impl Into<String>) -> Self {
        Reply::Rejected {
            error: error.into(),
        }
    }
}

/// Request/reply mailbox contract the control loop consumes.
///
/// The loop polls `has_pending` exactly once per iteration, consumes at
/// most one command, and sends exactly one reply per received command
/// before the next receive. No operation may suspend.
pub trait CommandEndpoint {
    fn has_pending(&self) -> bool;

    fn receive(&mut self) -> Option<Command>;

    fn send_reply(&mut self, reply: Reply);
}
