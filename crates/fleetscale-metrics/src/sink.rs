//! The metrics sink contract.

use std::sync::Arc;

use serde::Serialize;

/// Status reported when a call failed before the remote side answered.
pub const LOCAL_FAILURE_STATUS: i64 = -1;

/// One remote API call outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiCallSample {
    pub cluster_id: String,
    pub action: String,
    pub region: String,
    pub request_id: String,
    /// Remote return code; 0 is success.
    pub status_code: i64,
    pub latency_ms: f64,
}

impl ApiCallSample {
    pub fn is_success(&self) -> bool {
        self.status_code == 0
    }
}

/// Receives call samples. Implementations must return promptly and must
/// not propagate failures.
pub trait MetricsSink: Send + Sync {
    fn report(&self, sample: ApiCallSample);
}

/// Forwards every sample to each inner sink.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutSink {
    fn report(&self, sample: ApiCallSample) {
        for sink in &self.sinks {
            sink.report(sample.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<ApiCallSample>>);

    impl MetricsSink for Recording {
        fn report(&self, sample: ApiCallSample) {
            self.0.lock().unwrap().push(sample);
        }
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.report(ApiCallSample {
            cluster_id: "c".into(),
            action: "ListClusterNodeV2".into(),
            region: "cn-bj2".into(),
            request_id: "r".into(),
            status_code: 0,
            latency_ms: 12.0,
        });

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }
}
