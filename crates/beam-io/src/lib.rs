//! Transport and observability collaborators for the beamline control
//! core: a JSON request/reply command server, a fire-and-forget telemetry
//! publisher, the channel-backed mailbox the core polls, and the
//! Prometheus exporter.

pub mod command_server;
pub mod error;
pub mod mailbox;
pub mod metrics;
pub mod protocol;
pub mod telemetry_pub;

pub use command_server::run_command_server;
pub use error::TransportError;
pub use mailbox::{command_channel, CommandMailbox, CommandPort};
pub use telemetry_pub::{run_telemetry_publisher, telemetry_channel, TelemetryTx};
