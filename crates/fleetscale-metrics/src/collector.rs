//! ApiCallCollector — in-process aggregation of remote API call samples.
//!
//! Keeps one running aggregate per action for the daemon's `/metrics`
//! endpoint. Recording is a short critical section under a std mutex so it
//! is safe to call from synchronous sink code.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::sink::{ApiCallSample, MetricsSink};

/// Running aggregate for one remote action.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionStats {
    pub action: String,
    pub calls: u64,
    pub failures: u64,
    pub last_status: i64,
    pub latency_ms_sum: f64,
    pub last_request_id: String,
}

impl ActionStats {
    pub fn mean_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.latency_ms_sum / self.calls as f64
        }
    }
}

/// Aggregates samples per action. `Clone` shares the same aggregates.
#[derive(Debug, Clone, Default)]
pub struct ApiCallCollector {
    stats: Arc<Mutex<HashMap<String, ActionStats>>>,
}

impl ApiCallCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: &ApiCallSample) {
        let mut stats = self.stats.lock().expect("collector lock");
        let entry = stats
            .entry(sample.action.clone())
            .or_insert_with(|| ActionStats {
                action: sample.action.clone(),
                ..Default::default()
            });
        entry.calls += 1;
        if !sample.is_success() {
            entry.failures += 1;
        }
        entry.last_status = sample.status_code;
        entry.latency_ms_sum += sample.latency_ms;
        entry.last_request_id = sample.request_id.clone();
        debug!(
            action = %sample.action,
            status = sample.status_code,
            latency_ms = sample.latency_ms,
            "api call recorded"
        );
    }

    /// Aggregates sorted by action name.
    pub fn stats(&self) -> Vec<ActionStats> {
        let stats = self.stats.lock().expect("collector lock");
        let mut out: Vec<ActionStats> = stats.values().cloned().collect();
        out.sort_by(|a, b| a.action.cmp(&b.action));
        out
    }

    pub fn render_prometheus(&self) -> String {
        crate::prometheus::render_prometheus(&self.stats())
    }
}

impl MetricsSink for ApiCallCollector {
    fn report(&self, sample: ApiCallSample) {
        self.record(&sample);
    }
}
