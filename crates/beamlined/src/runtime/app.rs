use crate::rt::{self, RtConfig};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use beam_core::{LoopConfig, RtLoop, SimBeamline};
use beam_io::{command_channel, metrics, run_command_server, run_telemetry_publisher, telemetry_channel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

pub fn run_from_args() {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return;
    }
    run(config);
}

pub fn run(config: RuntimeConfig) {
    init_tracing(config.json_logs);
    metrics::init_metrics();

    let loop_config = LoopConfig {
        hz: config.hz,
        adaptive_frequency: config.adaptive_frequency,
        ..Default::default()
    };

    let line = SimBeamline::with_noise(config.noise_seed, config.bpm_noise, 0.0);
    let mut rt_loop = RtLoop::new(
        loop_config,
        line.bpm.clone(),
        line.bic.clone(),
        line.magnet.clone(),
    );
    rt_loop.set_alarm_callback(Box::new(|alarm| {
        error!(%alarm, "machine protection alarm");
    }));

    let shared = rt_loop.shared();
    let status = rt_loop.status_exchange();

    let _metrics_handle = config.metrics_addr.clone().map(|addr| {
        info!(addr = %addr, "starting metrics server");
        metrics::serve_metrics(addr, Arc::clone(&status))
    });

    let (mut mailbox, command_port) = command_channel(16);
    let (telemetry_tx, telemetry_rx) = telemetry_channel(1024);

    // Transport threads outlive the loop slightly; they stop on this flag.
    let io_stop = Arc::new(AtomicBool::new(false));

    let command_handle = {
        let addr = config.command_addr.clone();
        let stop = Arc::clone(&io_stop);
        thread::spawn(move || {
            if let Err(err) = run_command_server(&addr, command_port, stop) {
                error!(error = %err, "command server failed");
            }
        })
    };

    let telemetry_handle = if config.telemetry_enabled {
        let addr = config.telemetry_addr.clone();
        let stop = Arc::clone(&io_stop);
        Some(thread::spawn(move || {
            if let Err(err) = run_telemetry_publisher(&addr, telemetry_rx, stop) {
                error!(error = %err, "telemetry publisher failed");
            }
        }))
    } else {
        info!("telemetry publisher disabled");
        drop(telemetry_rx);
        None
    };

    info!(
        hz = rt_loop.hz(),
        command_addr = %config.command_addr,
        telemetry = config.telemetry_enabled,
        "starting control loop thread"
    );

    let rt_config = RtConfig {
        cpu_core: config.rt_core,
        priority: config.rt_priority,
    };
    let loop_telemetry = telemetry_tx.clone();
    let loop_handle = thread::spawn(move || {
        let rt_status = rt::init_realtime(rt_config);
        if !rt_status.acquired {
            warn!("running without real-time scheduling; jitter target not guaranteed");
        }
        rt_loop.run(&mut mailbox, &loop_telemetry);
    });

    if let Some(seconds) = config.run_seconds {
        info!(seconds, "running for limited duration");
        thread::sleep(Duration::from_secs(seconds));
        shared.request_stop();
    }

    loop_handle.join().expect("control loop thread panicked");

    io_stop.store(true, Ordering::Relaxed);
    command_handle.join().ok();
    if let Some(handle) = telemetry_handle {
        handle.join().ok();
    }

    let final_status = status.read();
    info!(
        cycles = final_status.cycle,
        deadline_misses = final_status.deadline_misses,
        mps_aborts = final_status.abort_count,
        avg_loop_time_us = final_status.avg_loop_time_us,
        max_loop_time_us = final_status.max_loop_time_us,
        telemetry_dropped = telemetry_tx.dropped(),
        "run complete"
    );
}
