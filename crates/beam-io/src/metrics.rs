//! Prometheus metrics for the beamline control loop.

use crate::protocol::status_to_json;
use beam_core::{tags, StatusExchange, TelemetryRecord};
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static CYCLES: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(tags::CYCLES.metric, "Control loop cycles executed").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static DEADLINE_MISSES: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        tags::DEADLINE_MISSES.metric,
        "Control loop iterations that exceeded the deadline budget",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static MPS_ABORTS: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        tags::MPS_ABORTS.metric,
        "Beam aborts latched by machine protection",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static BEAM_POSITION: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(tags::BEAM_POSITION_MM.metric, "Beam position in mm").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static BEAM_INTENSITY: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        tags::BEAM_INTENSITY.metric,
        "Beam intensity in detector counts",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static MAGNET_CURRENT: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        tags::MAGNET_CURRENT_A.metric,
        "Steering magnet current in amperes",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static LOOP_TIME_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            tags::LOOP_TIME_US.metric,
            "Control loop execution time distribution in microseconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

/// Force lazy initialization so the first scrape sees every series.
pub fn init_metrics() {
    let _ = CYCLES.get();
    let _ = DEADLINE_MISSES.get();
    let _ = MPS_ABORTS.get();
    let _ = BEAM_POSITION.get();
    let _ = BEAM_INTENSITY.get();
    let _ = MAGNET_CURRENT.get();
    let _ = LOOP_TIME_US.get_sample_count();
}

/// Update the gauges from one telemetry record. Called by the telemetry
/// publisher thread, never by the loop thread.
pub fn observe_record(record: &TelemetryRecord) {
    CYCLES.set(record.cycle as i64);
    BEAM_POSITION.set(record.pos);
    BEAM_INTENSITY.set(record.intensity);
    MAGNET_CURRENT.set(record.mag);
    LOOP_TIME_US.observe(record.loop_time_us as f64);
}

/// Serve `/metrics`, `/health`, `/ready` and a JSON `/status` snapshot.
pub fn serve_metrics(bind_addr: String, status: Arc<StatusExchange>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(server) => server,
            Err(err) => {
                tracing::error!(addr = %bind_addr, error = %err, "failed to start metrics server");
                return;
            }
        };

        tracing::info!("metrics server listening on http://{bind_addr}/metrics");

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let snapshot = status.read();
                    DEADLINE_MISSES.set(snapshot.deadline_misses as i64);
                    MPS_ABORTS.set(snapshot.abort_count as i64);

                    let mut buffer = Vec::new();
                    let encoder = TextEncoder::new();
                    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!(error = %err, "failed to encode metrics");
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }
                    let response = Response::from_data(buffer).with_header(
                        Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..])
                            .unwrap(),
                    );
                    let _ = request.respond(response);
                }
                "/status" => {
                    let body = status_to_json(&status.read()).to_string();
                    let response = Response::from_string(body).with_header(
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
                    );
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the loop has completed at least one cycle.
                    if status.read().cycle > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}
