#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub hz: f64,
    pub command_addr: String,
    pub telemetry_addr: String,
    pub telemetry_enabled: bool,
    pub metrics_addr: Option<String>,
    pub json_logs: bool,
    pub adaptive_frequency: bool,
    pub bpm_noise: f64,
    pub noise_seed: u64,
    pub rt_core: Option<usize>,
    pub rt_priority: i32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            hz: 1000.0,
            command_addr: "127.0.0.1:5555".to_string(),
            telemetry_addr: "127.0.0.1:5556".to_string(),
            telemetry_enabled: true,
            metrics_addr: None,
            json_logs: false,
            adaptive_frequency: false,
            bpm_noise: 0.0,
            noise_seed: 1,
            rt_core: None,
            rt_priority: 50,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--hz" => {
                    if i + 1 < args.len() {
                        cfg.hz = args[i + 1].parse().unwrap_or(cfg.hz);
                        i += 1;
                    }
                }
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--bind" => {
                    if i + 1 < args.len() {
                        cfg.command_addr = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--telemetry-bind" => {
                    if i + 1 < args.len() {
                        cfg.telemetry_addr = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--no-telemetry" => {
                    cfg.telemetry_enabled = false;
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--adaptive-freq" => {
                    cfg.adaptive_frequency = true;
                }
                "--bpm-noise" => {
                    if i + 1 < args.len() {
                        cfg.bpm_noise = args[i + 1].parse().unwrap_or(0.0);
                        i += 1;
                    }
                }
                "--noise-seed" => {
                    if i + 1 < args.len() {
                        cfg.noise_seed = args[i + 1].parse().unwrap_or(cfg.noise_seed);
                        i += 1;
                    }
                }
                "--rt-core" => {
                    if i + 1 < args.len() {
                        cfg.rt_core = args[i + 1].parse::<usize>().ok();
                        i += 1;
                    }
                }
                "--rt-priority" => {
                    if i + 1 < args.len() {
                        cfg.rt_priority = args[i + 1].parse().unwrap_or(cfg.rt_priority);
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    pub fn print_help() {
        println!(
            r#"beamlined - Beamline real-time control daemon

USAGE:
    beamlined [OPTIONS]

OPTIONS:
    --hz <HZ>               Loop frequency, clamped to [10, 2000] [default: 1000]
    --bind <ADDR>           Command request/reply bind address [default: 127.0.0.1:5555]
    --telemetry-bind <ADDR> Telemetry broadcast bind address [default: 127.0.0.1:5556]
    --no-telemetry          Disable the telemetry publisher
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --run-seconds <SECS>    Run for a fixed duration then exit
    --json-logs             Output logs in JSON format (for log aggregation)
    --adaptive-freq         Reduce loop frequency automatically on repeated deadline misses
    --bpm-noise <MM>        Uniform BPM noise amplitude in mm [default: 0]
    --noise-seed <SEED>     Seed for the simulated sensor noise [default: 1]
    --rt-core <N>           Pin the loop thread to CPU core N (requires 'rt' feature)
    --rt-priority <P>       SCHED_FIFO priority 1-99 [default: 50] (requires 'rt' feature)
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,beamlined=trace)

EXAMPLES:
    # Basic run with metrics
    beamlined --metrics-addr 0.0.0.0:9090

    # Short simulation run at 500 Hz with noisy sensors
    beamlined --run-seconds 10 --hz 500 --bpm-noise 0.002
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("beamlined")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RuntimeConfig::from_args(&args(&[]));
        assert_eq!(cfg.hz, 1000.0);
        assert_eq!(cfg.command_addr, "127.0.0.1:5555");
        assert_eq!(cfg.telemetry_addr, "127.0.0.1:5556");
        assert!(cfg.telemetry_enabled);
        assert!(!cfg.adaptive_frequency);
        assert_eq!(cfg.rt_priority, 50);
    }

    #[test]
    fn flags_are_parsed() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--hz",
            "500",
            "--bind",
            "127.0.0.1:7100",
            "--no-telemetry",
            "--run-seconds",
            "3",
            "--adaptive-freq",
            "--rt-core",
            "2",
        ]));
        assert_eq!(cfg.hz, 500.0);
        assert_eq!(cfg.command_addr, "127.0.0.1:7100");
        assert!(!cfg.telemetry_enabled);
        assert_eq!(cfg.run_seconds, Some(3));
        assert!(cfg.adaptive_frequency);
        assert_eq!(cfg.rt_core, Some(2));
    }

    #[test]
    fn help_short_circuits_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["--help", "--hz", "500"]));
        assert!(cfg.show_help);
        assert_eq!(cfg.hz, 1000.0);
    }
}
