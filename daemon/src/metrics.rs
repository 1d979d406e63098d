//! Prometheus metrics

use crate::config::MonitoringConfig;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::LazyLock;
use std::time::Duration;
use teebroker_protocol::ResultCode;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Global metrics registry
static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Metrics struct
pub struct Metrics {
    // Counters
    pub commands: IntCounterVec,
    pub sequence_gaps: IntCounter,
    pub storage_errors: IntCounter,

    // Gauges
    pub active_connections: IntGauge,

    // Histograms
    pub request_duration: Histogram,
    pub payload_size: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let commands = IntCounterVec::new(
            Opts::new("teebroker_commands_total", "Commands handled, by outcome"),
            &["command", "result"],
        )?;

        let sequence_gaps = IntCounter::with_opts(Opts::new(
            "teebroker_sequence_gaps_total",
            "Command ids that did not follow the previous one",
        ))?;

        let storage_errors = IntCounter::with_opts(Opts::new(
            "teebroker_storage_errors_total",
            "Registry operations that failed in storage",
        ))?;

        let active_connections = IntGauge::with_opts(Opts::new(
            "teebroker_active_connections",
            "Number of connected clients",
        ))?;

        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "teebroker_request_duration_seconds",
            "Command handling time in seconds",
        ))?;

        let payload_size = Histogram::with_opts(
            HistogramOpts::new("teebroker_payload_size_bytes", "Command payload size in bytes")
                .buckets(vec![0.0, 64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0]),
        )?;

        // Already-registered collectors (a second instance) are left as they are
        REGISTRY.register(Box::new(commands.clone())).ok();
        REGISTRY.register(Box::new(sequence_gaps.clone())).ok();
        REGISTRY.register(Box::new(storage_errors.clone())).ok();
        REGISTRY.register(Box::new(active_connections.clone())).ok();
        REGISTRY.register(Box::new(request_duration.clone())).ok();
        REGISTRY.register(Box::new(payload_size.clone())).ok();

        Ok(Self {
            commands,
            sequence_gaps,
            storage_errors,
            active_connections,
            request_duration,
            payload_size,
        })
    }

    /// Record one answered command
    pub fn record(&self, command: &str, result: ResultCode, payload: usize, elapsed: Duration) {
        self.commands
            .with_label_values(&[command, result_label(result)])
            .inc();
        self.payload_size.observe(payload as f64);
        self.request_duration.observe(elapsed.as_secs_f64());
    }
}

fn result_label(result: ResultCode) -> &'static str {
    match result {
        ResultCode::Ok => "ok",
        ResultCode::NotFound => "not_found",
        ResultCode::StorageError => "storage_error",
        ResultCode::UnknownCommand => "unknown_command",
        ResultCode::PayloadTooLarge => "payload_too_large",
        ResultCode::InvalidPayload => "invalid_payload",
    }
}

/// Render the global registry in the text exposition format
pub fn gather_text() -> Vec<u8> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    buffer
}

/// Start the metrics server
pub fn start_server(config: &MonitoringConfig) -> JoinHandle<()> {
    let bind = config.prometheus_bind;
    let enabled = config.prometheus_enabled;

    tokio::spawn(async move {
        if !enabled {
            info!("Prometheus metrics disabled");
            return;
        }

        use bytes::Bytes;
        use http_body_util::Full;
        use hyper::header::{CONTENT_TYPE, HeaderValue};
        use hyper::{Response, server::conn::http1, service::service_fn};
        use hyper_util::rt::TokioIo;

        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind metrics server: {}", e);
                return;
            }
        };

        info!("Prometheus metrics server listening on {}", bind);

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(r) => r,
                Err(e) => {
                    error!("Metrics accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(|_req| async {
                    let mut response = Response::new(Full::new(Bytes::from(gather_text())));
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                    Ok::<_, std::convert::Infallible>(response)
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Metrics connection error: {}", e);
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record("read_auth_token", ResultCode::NotFound, 0, Duration::from_millis(2));

        assert_eq!(
            metrics
                .commands
                .with_label_values(&["read_auth_token", "not_found"])
                .get(),
            1
        );

        let text = String::from_utf8(gather_text()).unwrap();
        assert!(text.contains("teebroker_active_connections"));
    }
}
