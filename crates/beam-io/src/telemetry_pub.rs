use crate::error::TransportError;
use crate::metrics;
use crate::protocol::telemetry_to_json;
use beam_core::{TelemetryRecord, TelemetrySink};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build the bounded telemetry stream between the loop thread and the
/// publisher thread.
pub fn telemetry_channel(capacity: usize) -> (TelemetryTx, Receiver<TelemetryRecord>) {
    let (tx, rx) = bounded(capacity);
    (
        TelemetryTx {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Loop-thread side of the telemetry stream. `publish` never blocks: a
/// full buffer drops the record and counts the drop.
#[derive(Clone)]
pub struct TelemetryTx {
    tx: Sender<TelemetryRecord>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryTx {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for TelemetryTx {
    fn publish(&self, record: TelemetryRecord) {
        if self.tx.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Broadcast telemetry records as JSON lines to every connected client
/// and feed the Prometheus gauges. Slow clients lose records rather than
/// backpressuring the stream; dead clients are dropped.
pub fn run_telemetry_publisher(
    bind_addr: &str,
    records: Receiver<TelemetryRecord>,
    stop: Arc<AtomicBool>,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(bind_addr).map_err(|source| TransportError::Bind {
        addr: bind_addr.to_string(),
        source,
    })?;
    listener.set_nonblocking(true)?;
    info!(addr = %bind_addr, "telemetry publisher listening");

    let mut clients: Vec<TcpStream> = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(client_addr = %addr, "telemetry subscriber connected");
                if stream.set_nonblocking(true).is_ok() {
                    clients.push(stream);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => warn!(error = %err, "telemetry accept error"),
        }

        match records.recv_timeout(Duration::from_millis(10)) {
            Ok(record) => {
                metrics::observe_record(&record);

                if !clients.is_empty() {
                    let mut line = telemetry_to_json(&record).into_bytes();
                    line.push(b'\n');
                    clients.retain_mut(|client| match client.write(&line) {
                        Ok(_) => true,
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            // Slow subscriber: this record is lost for it.
                            true
                        }
                        Err(err) => {
                            debug!(error = %err, "dropping telemetry subscriber");
                            false
                        }
                    });
                }

                // Drain whatever else is queued without sleeping again.
                for record in records.try_iter() {
                    metrics::observe_record(&record);
                    if clients.is_empty() {
                        continue;
                    }
                    let mut line = telemetry_to_json(&record).into_bytes();
                    line.push(b'\n');
                    clients.retain_mut(|client| match client.write(&line) {
                        Ok(_) => true,
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => true,
                        Err(_) => false,
                    });
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn publish_never_blocks_and_counts_drops() {
        let (tx, rx) = telemetry_channel(2);
        for cycle in 0..5 {
            tx.publish(TelemetryRecord {
                cycle,
                ..Default::default()
            });
        }
        assert_eq!(tx.dropped(), 3);
        // The two oldest records survive.
        assert_eq!(rx.recv().unwrap().cycle, 0);
        assert_eq!(rx.recv().unwrap().cycle, 1);
    }

    #[test]
    fn subscriber_receives_json_lines() {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let (tx, rx) = telemetry_channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let publisher_stop = Arc::clone(&stop);
        let publisher_addr = addr.clone();
        let publisher = std::thread::spawn(move || {
            run_telemetry_publisher(&publisher_addr, rx, publisher_stop).unwrap();
        });

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
        let stream = stream.expect("failed to connect to telemetry publisher");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream);

        // Give the publisher time to register the subscriber.
        std::thread::sleep(Duration::from_millis(50));
        tx.publish(TelemetryRecord {
            t: 0.5,
            cycle: 3,
            pos: 0.25,
            mps_safe: true,
            ..Default::default()
        });

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["cycle"], 3);
        assert_eq!(parsed["pos"], 0.25);
        assert_eq!(parsed["mps_safe"], true);
        assert_eq!(parsed["deadline_miss"], 0);

        stop.store(true, Ordering::Relaxed);
        publisher.join().unwrap();
    }
}
