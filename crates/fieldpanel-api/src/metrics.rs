use std::sync::Once;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref TRIALS_STARTED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fieldpanel_trials_started_total",
        "Simulation trial containers launched"
    ))
    .unwrap();

    pub static ref TRIAL_START_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fieldpanel_trial_start_failures_total",
        "Simulation trial launches that failed"
    ))
    .unwrap();

    pub static ref BATCHES_STARTED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fieldpanel_batches_started_total",
        "Batch runs started"
    ))
    .unwrap();

    pub static ref RECONSTRUCTIONS_STARTED_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "fieldpanel_reconstructions_started_total",
        "GP reconstruction runs started"
    ))
    .unwrap();

    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fieldpanel_events_published_total", "Dashboard events by kind"),
        &["event"]
    )
    .unwrap();

    pub static ref RUNNING_TRIALS: IntGauge = IntGauge::with_opts(Opts::new(
        "fieldpanel_running_trials",
        "Trial containers currently running"
    ))
    .unwrap();

    pub static ref WS_CLIENTS: IntGauge = IntGauge::with_opts(Opts::new(
        "fieldpanel_websocket_clients",
        "Connected dashboard WebSocket clients"
    ))
    .unwrap();
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(TRIALS_STARTED_TOTAL.clone()),
            Box::new(TRIAL_START_FAILURES_TOTAL.clone()),
            Box::new(BATCHES_STARTED_TOTAL.clone()),
            Box::new(RECONSTRUCTIONS_STARTED_TOTAL.clone()),
            Box::new(EVENTS_PUBLISHED_TOTAL.clone()),
            Box::new(RUNNING_TRIALS.clone()),
            Box::new(WS_CLIENTS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                warn!("could not register metric: {}", e);
            }
        }
    });
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode metrics: {}", e);
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        String::from_utf8_lossy(&buffer).into_owned(),
    )
}
