use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

/// OpenTelemetry instruments exported to the dedicated metrics server,
/// mirroring each engine's own atomic [`crate::stats`] counters.
#[derive(Clone)]
pub struct Metrics {
    pub connections_total: Counter<u64>,
    pub connections_active: UpDownCounter<i64>,

    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,

    pub ws_messages_sent_total: Counter<u64>,
    pub ws_messages_received_total: Counter<u64>,

    pub sse_messages_sent_total: Counter<u64>,
    pub sse_rejected_connections_total: Counter<u64>,

    pub proxy_requests_total: Counter<u64>,
    pub proxy_failures_total: Counter<u64>,
    pub proxy_bytes_total: Counter<u64>,
    pub proxy_duration_seconds: Histogram<f64>,

    pub errors_total: Counter<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            connections_total: meter
                .u64_counter("webhub_connections_total")
                .with_description("Total number of connections established")
                .build(),
            connections_active: meter
                .i64_up_down_counter("webhub_connections_active")
                .with_description("Number of active connections")
                .build(),

            requests_total: meter
                .u64_counter("webhub_requests_total")
                .with_description("Total number of requests processed")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("webhub_requests_duration_seconds")
                .with_description("Request duration in seconds")
                .build(),

            ws_messages_sent_total: meter
                .u64_counter("webhub_ws_messages_sent_total")
                .with_description("Total number of WebSocket messages sent")
                .build(),
            ws_messages_received_total: meter
                .u64_counter("webhub_ws_messages_received_total")
                .with_description("Total number of WebSocket messages received")
                .build(),

            sse_messages_sent_total: meter
                .u64_counter("webhub_sse_messages_sent_total")
                .with_description("Total number of SSE messages sent")
                .build(),
            sse_rejected_connections_total: meter
                .u64_counter("webhub_sse_rejected_connections_total")
                .with_description("Total number of SSE connections rejected (full client queue)")
                .build(),

            proxy_requests_total: meter
                .u64_counter("webhub_proxy_requests_total")
                .with_description("Total number of requests forwarded to proxy targets")
                .build(),
            proxy_failures_total: meter
                .u64_counter("webhub_proxy_failures_total")
                .with_description("Total number of failed proxy requests")
                .build(),
            proxy_bytes_total: meter
                .u64_counter("webhub_proxy_bytes_total")
                .with_description("Total response bytes streamed back through the proxy")
                .build(),
            proxy_duration_seconds: meter
                .f64_histogram("webhub_proxy_duration_seconds")
                .with_description("Proxy round-trip duration in seconds")
                .build(),

            errors_total: meter
                .u64_counter("webhub_errors_total")
                .with_description("Total number of errors")
                .build(),
        }
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("webhub");
    let metrics = Arc::new(Metrics::new(meter));

    Ok((metrics, registry))
}
