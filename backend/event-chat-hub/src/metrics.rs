use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_chat_hub_http_requests_total",
            "Total HTTP requests handled by event-chat-hub",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create event_chat_hub_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_chat_hub_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "event_chat_hub_http_request_duration_seconds",
            "HTTP request latency for event-chat-hub",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .expect("failed to create event_chat_hub_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register event_chat_hub_http_request_duration_seconds");
    histogram
});

static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "event_chat_hub_ws_connections_active",
        "WebSocket connections currently registered with the hub",
    )
    .expect("failed to create event_chat_hub_ws_connections_active");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register event_chat_hub_ws_connections_active");
    gauge
});

static WS_CHANNELS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "event_chat_hub_ws_channels_active",
        "Channels with at least one subscribed connection",
    )
    .expect("failed to create event_chat_hub_ws_channels_active");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register event_chat_hub_ws_channels_active");
    gauge
});

static WS_BROADCASTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "event_chat_hub_ws_broadcasts_total",
        "Broadcast requests accepted by the hub",
    )
    .expect("failed to create event_chat_hub_ws_broadcasts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_chat_hub_ws_broadcasts_total");
    counter
});

static WS_PAYLOADS_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "event_chat_hub_ws_payloads_enqueued_total",
        "Payloads placed in a connection mailbox by a broadcast",
    )
    .expect("failed to create event_chat_hub_ws_payloads_enqueued_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_chat_hub_ws_payloads_enqueued_total");
    counter
});

static WS_EVICTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_chat_hub_ws_evictions_total",
            "Connections torn down without a client request",
        ),
        &["reason"],
    )
    .expect("failed to create event_chat_hub_ws_evictions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_chat_hub_ws_evictions_total");
    counter
});

static WS_UPGRADES_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "event_chat_hub_ws_upgrades_rejected_total",
        "Upgrade requests rejected by identity verification",
    )
    .expect("failed to create event_chat_hub_ws_upgrades_rejected_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_chat_hub_ws_upgrades_rejected_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn connection_opened() {
    WS_CONNECTIONS_ACTIVE.inc();
}

pub fn connection_closed() {
    WS_CONNECTIONS_ACTIVE.dec();
}

pub fn set_active_channels(count: usize) {
    WS_CHANNELS_ACTIVE.set(count as i64);
}

pub fn record_broadcast(enqueued: usize) {
    WS_BROADCASTS_TOTAL.inc();
    WS_PAYLOADS_ENQUEUED_TOTAL.inc_by(enqueued as u64);
}

pub fn record_eviction(reason: &str) {
    WS_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_rejected_upgrade() {
    WS_UPGRADES_REJECTED_TOTAL.inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
