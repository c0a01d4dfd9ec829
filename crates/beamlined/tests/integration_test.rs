use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

struct DaemonProcess {
    child: Child,
    command_addr: String,
    telemetry_addr: String,
}

impl DaemonProcess {
    fn start(extra_args: &[&str]) -> Self {
        let bin_path = std::env::var("CARGO_BIN_EXE_beamlined")
            .expect("CARGO_BIN_EXE_beamlined not set; run via cargo test");

        let command_addr = ephemeral_addr();
        let telemetry_addr = ephemeral_addr();

        let mut args = vec![
            "--bind".to_string(),
            command_addr.clone(),
            "--telemetry-bind".to_string(),
            telemetry_addr.clone(),
        ];
        args.extend(extra_args.iter().map(|s| s.to_string()));

        let child = Command::new(&bin_path)
            .args(&args)
            .spawn()
            .expect("failed to start beamlined");

        // Wait for the command port to open (up to 10s).
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(10) {
            if TcpStream::connect(&command_addr).is_ok() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        // Let the loop run a few cycles before the tests poke at it.
        thread::sleep(Duration::from_millis(300));

        Self {
            child,
            command_addr,
            telemetry_addr,
        }
    }

    fn command_connection(&self) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(&self.command_addr).expect("failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        (stream, reader)
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn ephemeral_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

fn roundtrip(
    stream: &mut TcpStream,
    reader: &mut BufReader<TcpStream>,
    request: &str,
) -> serde_json::Value {
    writeln!(stream, "{request}").unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    serde_json::from_str(&line).unwrap_or_else(|_| panic!("bad reply: {line:?}"))
}

#[test]
fn command_surface_over_tcp() {
    let daemon = DaemonProcess::start(&["--hz", "500"]);
    let (mut stream, mut reader) = daemon.command_connection();

    // Startup status reflects the configured frequency and defaults.
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["ok"], true);
    assert_eq!(status["hz"], 500.0);
    assert_eq!(status["control_enabled"], true);
    assert_eq!(status["emergency_stop"], false);
    assert_eq!(status["mps_safe"], true);
    assert_eq!(status["setpoint"], 0.0);
    assert!(status["cycle"].as_u64().unwrap() > 0);

    // Out-of-range frequencies are clamped.
    let reply = roundtrip(&mut stream, &mut reader, r#"{"cmd":"set_freq","hz":5}"#);
    assert_eq!(reply["ok"], true);
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["hz"], 10.0);

    let _ = roundtrip(&mut stream, &mut reader, r#"{"cmd":"set_freq","hz":10000}"#);
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["hz"], 2000.0);

    // Gains round-trip byte-for-byte through set_pid and get_status.
    let _ = roundtrip(
        &mut stream,
        &mut reader,
        r#"{"cmd":"set_pid","kp":0.8,"ki":0.1,"kd":0.02}"#,
    );
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["pid_gains"]["kp"], 0.8);
    assert_eq!(status["pid_gains"]["ki"], 0.1);
    assert_eq!(status["pid_gains"]["kd"], 0.02);

    // Emergency stop latches until recommission.
    let reply = roundtrip(&mut stream, &mut reader, r#"{"cmd":"emergency_stop"}"#);
    assert_eq!(reply["ok"], true);
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["emergency_stop"], true);
    assert_eq!(status["control_enabled"], false);

    let _ = roundtrip(
        &mut stream,
        &mut reader,
        r#"{"cmd":"enable_control","enable":true}"#,
    );
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["control_enabled"], false);

    let reply = roundtrip(&mut stream, &mut reader, r#"{"cmd":"recommission"}"#);
    assert_eq!(reply["ok"], true);
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["emergency_stop"], false);
    assert_eq!(status["control_enabled"], true);

    // Unknown and malformed commands are rejected, and the loop survives.
    let reply = roundtrip(&mut stream, &mut reader, r#"{"cmd":"warp_drive"}"#);
    assert_eq!(reply["ok"], false);
    let reply = roundtrip(&mut stream, &mut reader, r#"{"sp":1.0}"#);
    assert_eq!(reply["ok"], false);
    let status = roundtrip(&mut stream, &mut reader, r#"{"cmd":"get_status"}"#);
    assert_eq!(status["ok"], true);

    // Stop shuts the daemon down cleanly.
    let reply = roundtrip(&mut stream, &mut reader, r#"{"cmd":"stop"}"#);
    assert_eq!(reply["ok"], true);
}

#[test]
fn telemetry_stream_carries_loop_state() {
    let daemon = DaemonProcess::start(&[]);

    let stream = TcpStream::connect(&daemon.telemetry_addr).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream);

    let mut last_cycle = 0u64;
    for _ in 0..20 {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let record: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert!(record["t"].as_f64().unwrap() >= 0.0);
        assert!(record["pos"].is_number());
        assert!(record["intensity"].is_number());
        let mag = record["mag"].as_f64().unwrap();
        assert!((-2.0..=2.0).contains(&mag));
        assert!(record["deadline_miss"].as_u64().unwrap() <= 1);
        assert_eq!(record["mps_safe"], true);
        assert_eq!(record["mps_abort"], false);

        let cycle = record["cycle"].as_u64().unwrap();
        assert!(cycle > last_cycle, "telemetry out of cycle order");
        last_cycle = cycle;
    }
}
