// Metrics registry: counters/gauges as atomics, a small reservoir
// histogram for durations, matching the reference crate's statistics
// structs rather than pulling in an external metrics exporter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

const HISTOGRAM_RESERVOIR_SIZE: usize = 1_000;

#[derive(Default)]
struct Histogram {
    samples: RwLock<Vec<f64>>,
}

impl Histogram {
    fn record(&self, value_ms: f64) {
        let mut samples = self.samples.write();
        if samples.len() >= HISTOGRAM_RESERVOIR_SIZE {
            samples.remove(0);
        }
        samples.push(value_ms);
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut samples = self.samples.read().clone();
        if samples.is_empty() {
            return 0.0;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let index = ((samples.len() as f64 - 1.0) * p).round() as usize;
        samples[index.min(samples.len() - 1)]
    }
}

/// Labeled counter set, keyed by a small tuple rendered to a string (e.g.
/// `"source|schema|table|operation"`), matching the label sets in §4.7.
#[derive(Default)]
struct LabeledCounters {
    values: RwLock<HashMap<String, AtomicU64>>,
}

impl LabeledCounters {
    fn increment(&self, label: &str) {
        let values = self.values.read();
        if let Some(counter) = values.get(label) {
            counter.fetch_add(1, Ordering::SeqCst);
            return;
        }
        drop(values);
        self.values
            .write()
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst);
    }

    fn get(&self, label: &str) -> u64 {
        self.values
            .read()
            .get(label)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn total(&self) -> u64 {
        self.values.read().values().map(|c| c.load(Ordering::SeqCst)).sum()
    }
}

/// Per-stream lag and last-offset gauges, keyed by `(source, schema, table)`.
#[derive(Default)]
struct StreamGauges {
    lag_seconds: RwLock<HashMap<String, f64>>,
    last_offset: RwLock<HashMap<String, String>>,
}

pub struct MetricsRegistry {
    events_processed: LabeledCounters,
    events_failed: LabeledCounters,
    events_published: LabeledCounters,
    events_publish_failed: LabeledCounters,
    retry_attempts: LabeledCounters,
    dead_letter_events: LabeledCounters,
    processing_duration: Histogram,
    publish_duration: Histogram,
    stream_gauges: StreamGauges,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            events_processed: LabeledCounters::default(),
            events_failed: LabeledCounters::default(),
            events_published: LabeledCounters::default(),
            events_publish_failed: LabeledCounters::default(),
            retry_attempts: LabeledCounters::default(),
            dead_letter_events: LabeledCounters::default(),
            processing_duration: Histogram::default(),
            publish_duration: Histogram::default(),
            stream_gauges: StreamGauges::default(),
        }
    }

    fn stream_key(source: &str, schema: &str, table: &str, operation: &str) -> String {
        format!("{source}|{schema}|{table}|{operation}")
    }

    fn publisher_key(source: &str, publisher: &str, destination: &str) -> String {
        format!("{source}|{publisher}|{destination}")
    }

    pub fn record_event_processed(&self, source: &str, schema: &str, table: &str, operation: &str, duration_ms: f64) {
        self.events_processed
            .increment(&Self::stream_key(source, schema, table, operation));
        self.processing_duration.record(duration_ms);
    }

    pub fn record_event_failed(&self, source: &str, schema: &str, table: &str, operation: &str) {
        self.events_failed
            .increment(&Self::stream_key(source, schema, table, operation));
    }

    pub fn record_event_published(&self, source: &str, publisher: &str, destination: &str, duration_ms: f64) {
        self.events_published
            .increment(&Self::publisher_key(source, publisher, destination));
        self.publish_duration.record(duration_ms);
    }

    pub fn record_publish_failed(&self, source: &str, publisher: &str, destination: &str) {
        self.events_publish_failed
            .increment(&Self::publisher_key(source, publisher, destination));
    }

    pub fn record_retry_attempt(&self, source: &str, publisher: &str, destination: &str) {
        self.retry_attempts
            .increment(&Self::publisher_key(source, publisher, destination));
    }

    pub fn record_dead_letter(&self, source: &str, publisher: &str, destination: &str) {
        self.dead_letter_events
            .increment(&Self::publisher_key(source, publisher, destination));
    }

    pub fn set_stream_lag_seconds(&self, source: &str, schema: &str, table: &str, lag: f64) {
        self.stream_gauges
            .lag_seconds
            .write()
            .insert(format!("{source}|{schema}|{table}"), lag);
    }

    pub fn set_last_offset(&self, source: &str, schema: &str, table: &str, offset: &str) {
        self.stream_gauges
            .last_offset
            .write()
            .insert(format!("{source}|{schema}|{table}"), offset.to_string());
    }

    pub fn stream_lag_seconds(&self, source: &str, schema: &str, table: &str) -> Option<f64> {
        self.stream_gauges
            .lag_seconds
            .read()
            .get(&format!("{source}|{schema}|{table}"))
            .copied()
    }

    pub fn events_processed_total(&self) -> u64 {
        self.events_processed.total()
    }

    pub fn events_failed_total(&self) -> u64 {
        self.events_failed.total()
    }

    pub fn processing_duration_p95_ms(&self) -> f64 {
        self.processing_duration.percentile(0.95)
    }

    pub fn publish_duration_p95_ms(&self) -> f64 {
        self.publish_duration.percentile(0.95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label() {
        let registry = MetricsRegistry::new();
        registry.record_event_processed("src-A", "public", "users", "INSERT", 5.0);
        registry.record_event_processed("src-A", "public", "users", "INSERT", 7.0);
        registry.record_event_processed("src-A", "public", "orders", "UPDATE", 3.0);

        assert_eq!(registry.events_processed_total(), 3);
        assert!(registry.processing_duration_p95_ms() > 0.0);
    }

    #[test]
    fn stream_gauges_track_latest_value() {
        let registry = MetricsRegistry::new();
        registry.set_stream_lag_seconds("src-A", "public", "users", 1.5);
        registry.set_stream_lag_seconds("src-A", "public", "users", 0.2);
        assert_eq!(registry.stream_lag_seconds("src-A", "public", "users"), Some(0.2));
    }
}
