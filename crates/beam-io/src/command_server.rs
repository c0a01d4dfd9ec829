use crate::error::TransportError;
use crate::mailbox::CommandPort;
use crate::protocol::{parse_command, reply_to_json};
use beam_core::Reply;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long the server waits for the loop to answer one request before
/// giving up on it. The loop replies within one period, so this only
/// trips during shutdown races.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// JSON-lines request/reply server for operator commands.
///
/// One client at a time, in arrival order. Each received line is decoded,
/// handed to the loop through the mailbox, and answered with exactly one
/// JSON line. Runs until `stop` is set.
pub fn run_command_server(
    bind_addr: &str,
    port: CommandPort,
    stop: Arc<AtomicBool>,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(bind_addr).map_err(|source| TransportError::Bind {
        addr: bind_addr.to_string(),
        source,
    })?;
    listener.set_nonblocking(true)?;
    info!(addr = %bind_addr, "command server listening");

    let mut client: Option<std::net::TcpStream> = None;
    let mut recv_buf: Vec<u8> = Vec::with_capacity(4096);

    while !stop.load(Ordering::Relaxed) {
        if client.is_none() {
            match listener.accept() {
                Ok((stream, addr)) => {
                    info!(client_addr = %addr, "command client connected");
                    stream.set_nonblocking(true)?;
                    recv_buf.clear();
                    client = Some(stream);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => warn!(error = %err, "command accept error"),
            }
        }

        let mut drop_client = false;
        if let Some(stream) = client.as_mut() {
            let mut chunk = [0u8; 1024];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    info!("command client disconnected");
                    drop_client = true;
                }
                Ok(n) => {
                    recv_buf.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = recv_buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = recv_buf.drain(..=pos).collect();
                        let Ok(text) = std::str::from_utf8(&line) else {
                            continue;
                        };
                        let trimmed = text.trim();
                        if trimmed.is_empty() {
                            continue;
                        }

                        let reply = dispatch(&port, trimmed);
                        let mut payload = reply_to_json(&reply).into_bytes();
                        payload.push(b'\n');
                        if write_all_blocking(stream, &payload).is_err() {
                            drop_client = true;
                            break;
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    warn!(error = %err, "command read error");
                    drop_client = true;
                }
            }
        }

        if drop_client {
            client = None;
            recv_buf.clear();
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    Ok(())
}

/// Hand one decoded line to the loop and collect its reply.
fn dispatch(port: &CommandPort, line: &str) -> Reply {
    let command = parse_command(line);
    if port.submit(command).is_err() {
        return Reply::rejected("control loop busy");
    }
    match port.await_reply(REPLY_TIMEOUT) {
        Some(reply) => reply,
        None => Reply::rejected("control loop not responding"),
    }
}

/// The client socket is non-blocking for reads; replies are small, so a
/// short retry loop is enough to flush them.
fn write_all_blocking(stream: &mut std::net::TcpStream, mut buf: &[u8]) -> std::io::Result<()> {
    let mut retries = 0;
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                retries += 1;
                if retries > 1000 {
                    return Err(std::io::ErrorKind::TimedOut.into());
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::command_channel;
    use beam_core::{Command, CommandEndpoint};
    use std::io::{BufRead, BufReader};
    use std::net::{TcpListener, TcpStream};

    fn ephemeral_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[test]
    fn serves_one_reply_per_request_line() {
        let addr = ephemeral_addr();
        let (mut mailbox, port) = command_channel(4);
        let stop = Arc::new(AtomicBool::new(false));

        let server_stop = Arc::clone(&stop);
        let server_addr = addr.clone();
        let server = std::thread::spawn(move || {
            run_command_server(&server_addr, port, server_stop).unwrap();
        });

        // Answer requests the way the loop thread would.
        let loop_stop = Arc::new(AtomicBool::new(false));
        let answer_stop = Arc::clone(&loop_stop);
        let answerer = std::thread::spawn(move || {
            while !answer_stop.load(Ordering::Relaxed) {
                if let Some(command) = mailbox.receive() {
                    let reply = match command {
                        Command::GetStatus => Reply::Status(Default::default()),
                        Command::Invalid { reason } => Reply::Rejected { error: reason },
                        _ => Reply::Ok,
                    };
                    mailbox.send_reply(reply);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        // Connect with retries while the server binds.
        let mut stream = None;
        for _ in 0..50 {
            match TcpStream::connect(&addr) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        let mut stream = stream.expect("failed to connect to command server");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut line = String::new();
        writeln!(stream, r#"{{"cmd":"emergency_stop"}}"#).unwrap();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim(), r#"{"ok":true}"#);

        line.clear();
        writeln!(stream, r#"{{"cmd":"no_such_thing"}}"#).unwrap();
        reader.read_line(&mut line).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["ok"], false);

        line.clear();
        writeln!(stream, r#"{{"cmd":"get_status"}}"#).unwrap();
        reader.read_line(&mut line).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["ok"], true);
        assert!(parsed.get("pid_gains").is_some());

        stop.store(true, Ordering::Relaxed);
        loop_stop.store(true, Ordering::Relaxed);
        server.join().unwrap();
        answerer.join().unwrap();
    }
}
