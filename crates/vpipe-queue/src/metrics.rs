//! Broker metrics.
//!
//! Counters for publish health and delivery outcomes per queue.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Successful publishes by queue.
    pub const PUBLISHED_TOTAL: &str = "vpipe_queue_published_total";

    /// Publish retry attempts by queue.
    pub const PUBLISH_RETRIES_TOTAL: &str = "vpipe_queue_publish_retries_total";

    /// Publishes given up on under the fail-open policy, by queue.
    pub const PUBLISH_DROPPED_TOTAL: &str = "vpipe_queue_publish_dropped_total";

    /// Settled deliveries by queue and disposition.
    pub const DELIVERIES_TOTAL: &str = "vpipe_queue_deliveries_total";
}

pub fn record_published(queue: &str) {
    counter!(names::PUBLISHED_TOTAL, "queue" => queue.to_string()).increment(1);
}

pub fn record_publish_retry(queue: &str) {
    counter!(names::PUBLISH_RETRIES_TOTAL, "queue" => queue.to_string()).increment(1);
}

pub fn record_publish_dropped(queue: &str) {
    counter!(names::PUBLISH_DROPPED_TOTAL, "queue" => queue.to_string()).increment(1);
}

pub fn record_delivery(queue: &str, disposition: &'static str) {
    counter!(
        names::DELIVERIES_TOTAL,
        "queue" => queue.to_string(),
        "disposition" => disposition
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::PUBLISHED_TOTAL.starts_with("vpipe_queue_"));
        assert!(names::PUBLISH_DROPPED_TOTAL.contains("dropped"));
        assert!(names::DELIVERIES_TOTAL.contains("deliveries"));
    }
}
