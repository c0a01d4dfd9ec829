use beam_core::{Command, CommandEndpoint, Reply};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;
use tracing::warn;

/// Build the bounded request/reply channel pair between a transport
/// thread and the loop thread. The loop side never blocks; the transport
/// side may wait for replies.
pub fn command_channel(capacity: usize) -> (CommandMailbox, CommandPort) {
    let (request_tx, request_rx) = bounded(capacity);
    let (reply_tx, reply_rx) = bounded(capacity);
    (
        CommandMailbox {
            requests: request_rx,
            replies: reply_tx,
        },
        CommandPort {
            requests: request_tx,
            replies: reply_rx,
        },
    )
}

/// Loop-thread side of the command channel. All operations are
/// non-blocking, as required by the mailbox contract.
pub struct CommandMailbox {
    requests: Receiver<Command>,
    replies: Sender<Reply>,
}

impl CommandEndpoint for CommandMailbox {
    fn has_pending(&self) -> bool {
        !self.requests.is_empty()
    }

    fn receive(&mut self) -> Option<Command> {
        self.requests.try_recv().ok()
    }

    fn send_reply(&mut self, reply: Reply) {
        // With the request/reply lockstep the reply slot is always free;
        // a full buffer means the peer is gone, so the reply is dropped
        // rather than blocking the loop.
        if self.replies.try_send(reply).is_err() {
            warn!("dropping command reply: transport not draining");
        }
    }
}

/// Transport side of the command channel.
pub struct CommandPort {
    requests: Sender<Command>,
    replies: Receiver<Reply>,
}

impl CommandPort {
    /// Queue one request for the loop. Fails when the loop is not
    /// draining the mailbox (shutdown, or a flooding client).
    pub fn submit(&self, command: Command) -> Result<(), Command> {
        self.requests.try_send(command).map_err(|err| match err {
            TrySendError::Full(command) | TrySendError::Disconnected(command) => command,
        })
    }

    /// Wait for the loop's reply to the previously submitted request.
    pub fn await_reply(&self, timeout: Duration) -> Option<Reply> {
        self.replies.recv_timeout(timeout).ok()
    }
}
