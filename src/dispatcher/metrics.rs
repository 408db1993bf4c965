//! Prometheus metrics for the dispatcher

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    /// Counter: delivery attempts by outcome (sent, failed)
    pub static ref SENDS: CounterVec = register_counter_vec!(
        "bulkmail_sends_total",
        "Delivery attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to create sends metric");

    /// Counter: ticks that found the queue empty
    pub static ref EMPTY_POLLS: IntCounter = register_int_counter!(
        "bulkmail_empty_polls_total",
        "Ticks that found no pending recipient"
    )
    .expect("Failed to create empty_polls metric");

    /// Counter: SENDING claims reverted to PENDING
    pub static ref STALE_CLAIMS_RESET: IntCounter = register_int_counter!(
        "bulkmail_stale_claims_reset_total",
        "Stale SENDING claims returned to the queue"
    )
    .expect("Failed to create stale_claims_reset metric");

    /// Counter: bare addresses normalized into records
    pub static ref RECONCILED_LINES: IntCounter = register_int_counter!(
        "bulkmail_reconciled_lines_total",
        "Bare addresses converted to pending records"
    )
    .expect("Failed to create reconciled_lines metric");

    /// Gauge: pending recipients at last stats refresh
    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "bulkmail_queue_depth",
        "Pending recipients in the queue file"
    )
    .expect("Failed to create queue_depth metric");

    /// Gauge: dispatcher running state (1 = running, 0 = stopped)
    pub static ref RUNNING: IntGauge = register_int_gauge!(
        "bulkmail_dispatcher_running",
        "Dispatcher running state (1 = running, 0 = stopped)"
    )
    .expect("Failed to create running metric");
}

pub fn record_sent() {
    SENDS.with_label_values(&["sent"]).inc();
}

pub fn record_failed() {
    SENDS.with_label_values(&["failed"]).inc();
}

pub fn record_empty_poll() {
    EMPTY_POLLS.inc();
}

pub fn record_stale_reset(count: usize) {
    STALE_CLAIMS_RESET.inc_by(count as u64);
}

pub fn record_reconciled(count: usize) {
    RECONCILED_LINES.inc_by(count as u64);
}

pub fn set_queue_depth(pending: usize) {
    QUEUE_DEPTH.set(pending as i64);
}

pub fn set_running(running: bool) {
    RUNNING.set(i64::from(running));
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        record_sent();
        record_failed();
        record_empty_poll();
        record_stale_reset(2);
        record_reconciled(3);
        set_queue_depth(10);
        set_running(true);

        let output = encode_metrics();
        assert!(output.contains("bulkmail_sends_total"));
        assert!(output.contains("bulkmail_queue_depth"));
        assert!(output.contains("bulkmail_dispatcher_running"));
    }
}
