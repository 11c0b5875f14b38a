use std::collections::HashMap;
use std::sync::Mutex;

/// Counter/gauge sink shared by the pod launcher and the resource monitor.
///
/// Kept behind a trait so tests can assert on emissions without a metrics
/// exporter in the loop. Implementations must be safe for concurrent use;
/// one instance is shared across every in-flight launch sequence.
pub trait MetricsClient: Send + Sync {
    fn count(&self, name: &'static str, value: u64, tags: &[(&'static str, String)]);
    fn gauge(&self, name: &'static str, value: f64, tags: &[(&'static str, String)]);
}

/// Production sink backed by the `metrics` facade; whatever recorder the
/// binary installs (Prometheus exporter, statsd, ...) receives these.
#[derive(Clone, Default)]
pub struct TelemetryMetrics;

impl MetricsClient for TelemetryMetrics {
    fn count(&self, name: &'static str, value: u64, tags: &[(&'static str, String)]) {
        let labels: Vec<metrics::Label> = tags
            .iter()
            .map(|(k, v)| metrics::Label::new(*k, v.clone()))
            .collect();
        metrics::counter!(name, labels).increment(value);
    }

    fn gauge(&self, name: &'static str, value: f64, tags: &[(&'static str, String)]) {
        let labels: Vec<metrics::Label> = tags
            .iter()
            .map(|(k, v)| metrics::Label::new(*k, v.clone()))
            .collect();
        metrics::gauge!(name, labels).set(value);
    }
}

#[derive(Clone, Default)]
pub struct NoopMetrics;

impl MetricsClient for NoopMetrics {
    fn count(&self, _name: &'static str, _value: u64, _tags: &[(&'static str, String)]) {}
    fn gauge(&self, _name: &'static str, _value: f64, _tags: &[(&'static str, String)]) {}
}

/// In-memory sink for tests: records every emission for later assertion.
#[derive(Default)]
pub struct RecordingMetrics {
    counts: Mutex<Vec<(String, u64, HashMap<String, String>)>>,
    gauges: Mutex<Vec<(String, f64, HashMap<String, String>)>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> Vec<(String, u64, HashMap<String, String>)> {
        self.counts.lock().unwrap().clone()
    }

    pub fn gauges(&self) -> Vec<(String, f64, HashMap<String, String>)> {
        self.gauges.lock().unwrap().clone()
    }

    pub fn count_total(&self, name: &str) -> u64 {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, v, _)| v)
            .sum()
    }

    pub fn gauge_values(&self, name: &str) -> Vec<f64> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

impl MetricsClient for RecordingMetrics {
    fn count(&self, name: &'static str, value: u64, tags: &[(&'static str, String)]) {
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.counts
            .lock()
            .unwrap()
            .push((name.to_string(), value, tags));
    }

    fn gauge(&self, name: &'static str, value: f64, tags: &[(&'static str, String)]) {
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.gauges
            .lock()
            .unwrap()
            .push((name.to_string(), value, tags));
    }
}
