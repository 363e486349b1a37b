//! Prometheus metrics for the connectivity layer
//!
//! Registered once in the default registry and exported by the health
//! server's `/metrics` route.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

const LABEL_EVENT_TYPE: &str = "event_type";
const LABEL_OUTCOME: &str = "outcome";
const LABEL_POOL: &str = "pool";

/// Outbound envelopes written to the stream
static EVENTS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wflink_events_sent_total",
        "Outbound events written to the platform stream",
        &[LABEL_EVENT_TYPE]
    )
    .expect("Failed to register events_sent metric")
});

/// Inbound envelopes dispatched to a pool
static EVENTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wflink_events_received_total",
        "Inbound events dispatched per pool",
        &[LABEL_EVENT_TYPE, LABEL_POOL]
    )
    .expect("Failed to register events_received metric")
});

/// Inbound frames that could not be decoded
static DECODE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "wflink_decode_errors_total",
        "Inbound frames dropped because they could not be decoded"
    )
    .expect("Failed to register decode_errors metric")
});

/// Acknowledgments received (success, failure, uncorrelated)
static ACKS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wflink_acks_received_total",
        "Acknowledgments received by outcome",
        &[LABEL_OUTCOME]
    )
    .expect("Failed to register acks_received metric")
});

/// Entries waiting for acknowledgment
static SENT_CACHE_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "wflink_sent_cache_size",
        "Sent events awaiting acknowledgment"
    )
    .expect("Failed to register sent_cache_size metric")
});

/// Sent events dropped from the cache without an ack (evicted or expired)
static SENT_CACHE_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wflink_sent_cache_dropped_total",
        "Sent events dropped from the cache before acknowledgment",
        &[LABEL_OUTCOME]
    )
    .expect("Failed to register sent_cache_dropped metric")
});

/// ObserverState as a number (0=disconnected .. 4=ready)
static OBSERVER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "wflink_observer_state",
        "Handshake state (0=disconnected,1=connecting,2=connected,3=awaits_greet,4=ready)"
    )
    .expect("Failed to register observer_state metric")
});

/// Seconds since the last keep-alive, updated by the periodic check
static KEEP_ALIVE_AGE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "wflink_keep_alive_age_seconds",
        "Seconds since the last keep-alive from the platform"
    )
    .expect("Failed to register keep_alive_age metric")
});

static RECONNECT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wflink_reconnect_attempts_total",
        "Reconnection attempts by outcome",
        &[LABEL_OUTCOME]
    )
    .expect("Failed to register reconnect_attempts metric")
});

static RECONNECT_EXHAUSTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "wflink_reconnect_exhausted_total",
        "Reconnection cycles that hit the failure ceiling"
    )
    .expect("Failed to register reconnect_exhausted metric")
});

/// Pool tasks by pool and outcome (ok, error, panicked, cancelled)
static POOL_TASKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wflink_pool_tasks_total",
        "Tasks completed by execution pool and outcome",
        &[LABEL_POOL, LABEL_OUTCOME]
    )
    .expect("Failed to register pool_tasks metric")
});

pub fn inc_event_sent(event_type: &str) {
    EVENTS_SENT.with_label_values(&[event_type]).inc();
}

pub fn inc_event_received(event_type: &str, pool: &str) {
    EVENTS_RECEIVED.with_label_values(&[event_type, pool]).inc();
}

pub fn inc_decode_error() {
    DECODE_ERRORS.inc();
}

pub fn inc_ack(outcome: &str) {
    ACKS_RECEIVED.with_label_values(&[outcome]).inc();
}

pub fn set_sent_cache_size(size: usize) {
    SENT_CACHE_SIZE.set(size as i64);
}

pub fn inc_sent_cache_dropped(reason: &str) {
    SENT_CACHE_DROPPED.with_label_values(&[reason]).inc();
}

pub fn set_observer_state(value: i64) {
    OBSERVER_STATE.set(value);
}

pub fn set_keep_alive_age(seconds: f64) {
    KEEP_ALIVE_AGE.set(seconds);
}

pub fn inc_reconnect_attempt(outcome: &str) {
    RECONNECT_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn inc_reconnect_exhausted() {
    RECONNECT_EXHAUSTED.inc();
}

pub fn inc_pool_task(pool: &str, outcome: &str) {
    POOL_TASKS.with_label_values(&[pool, outcome]).inc();
}

/// Encode all registered metrics in Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
