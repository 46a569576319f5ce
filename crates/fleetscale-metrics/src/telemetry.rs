//! TelemetryReporter — pushes call samples to a remote telemetry endpoint.
//!
//! Each sample becomes one report carrying a status gauge and a latency
//! gauge. Delivery runs in a spawned task; failures are logged and dropped.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleetscale_core::{HttpError, post_json};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sink::{ApiCallSample, MetricsSink};

pub const STATUS_METRIC: &str = "fleetscale.api.status";
pub const LATENCY_METRIC: &str = "fleetscale.api.latency";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub metric: String,
    /// Cluster the sample belongs to.
    pub endpoint: String,
    pub tags: String,
    pub value: f64,
    pub timestamp: i64,
    #[serde(rename = "metrictype")]
    pub metric_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "sessionid")]
    pub session_id: String,
    pub token: String,
    #[serde(rename = "metricvalues")]
    pub metric_values: Vec<MetricValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReportResponse {
    #[serde(default)]
    invalid: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("telemetry report {session} rejected with status {status}")]
    Status { session: String, status: u16 },

    #[error("telemetry report rejected: {0}")]
    Invalid(String),

    #[error("malformed telemetry response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Pushes every sample to `endpoint` as a telemetry report.
#[derive(Debug, Clone)]
pub struct TelemetryReporter {
    endpoint: String,
    token: String,
    timeout: Duration,
    version: Option<String>,
}

impl TelemetryReporter {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
            version: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a `Version=` tag to every report.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `Action=..,Region=..[,Version=..]`, skipping empty values.
    pub fn tags(&self, action: &str, region: &str) -> String {
        let mut tags = Vec::new();
        if !action.is_empty() {
            tags.push(format!("Action={action}"));
        }
        if !region.is_empty() {
            tags.push(format!("Region={region}"));
        }
        if let Some(version) = &self.version {
            tags.push(format!("Version={version}"));
        }
        tags.join(",")
    }

    pub fn build_report(&self, sample: &ApiCallSample) -> Report {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let tags = self.tags(&sample.action, &sample.region);
        let gauge = |metric: &str, value: f64| MetricValue {
            metric: metric.to_string(),
            endpoint: sample.cluster_id.clone(),
            tags: tags.clone(),
            value,
            timestamp,
            metric_type: "gauge".to_string(),
        };

        Report {
            session_id: uuid::Uuid::new_v4().to_string(),
            token: self.token.clone(),
            metric_values: vec![
                gauge(STATUS_METRIC, sample.status_code as f64),
                gauge(LATENCY_METRIC, sample.latency_ms),
            ],
        }
    }

    /// Deliver one report and wait for the outcome.
    pub async fn send(&self, report: &Report) -> Result<(), TelemetryError> {
        let body = serde_json::to_vec(report)?;
        let headers = [("x-session-id", report.session_id.as_str())];
        let resp = post_json(&self.endpoint, &headers, body, self.timeout).await?;
        if !resp.is_success() {
            return Err(TelemetryError::Status {
                session: report.session_id.clone(),
                status: resp.status,
            });
        }

        let parsed: ReportResponse = if resp.body.is_empty() {
            ReportResponse::default()
        } else {
            serde_json::from_slice(&resp.body)?
        };
        if parsed.invalid > 0 {
            return Err(TelemetryError::Invalid(parsed.message));
        }
        debug!(session = %report.session_id, "telemetry report delivered");
        Ok(())
    }
}

impl MetricsSink for TelemetryReporter {
    fn report(&self, sample: ApiCallSample) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(action = %sample.action, "no async runtime, telemetry sample dropped");
                return;
            }
        };

        let reporter = self.clone();
        handle.spawn(async move {
            let report = reporter.build_report(&sample);
            if let Err(e) = reporter.send(&report).await {
                warn!(action = %sample.action, error = %e, "telemetry report failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn sample() -> ApiCallSample {
        ApiCallSample {
            cluster_id: "cluster-abc".to_string(),
            action: "AddClusterNode".to_string(),
            region: "cn-bj2".to_string(),
            request_id: "req-1".to_string(),
            status_code: -1,
            latency_ms: 42.5,
        }
    }

    #[test]
    fn tags_skip_empty_values() {
        let reporter = TelemetryReporter::new("http://127.0.0.1:1/api/update", "t");
        assert_eq!(reporter.tags("AddClusterNode", "cn-bj2"), "Action=AddClusterNode,Region=cn-bj2");
        assert_eq!(reporter.tags("", "cn-bj2"), "Region=cn-bj2");

        let reporter = reporter.with_version("0.1.0");
        assert_eq!(reporter.tags("A", ""), "Action=A,Version=0.1.0");
    }

    #[test]
    fn report_carries_status_and_latency_gauges() {
        let reporter = TelemetryReporter::new("http://127.0.0.1:1/api/update", "secret");
        let report = reporter.build_report(&sample());
        assert_eq!(report.token, "secret");
        assert_eq!(report.metric_values.len(), 2);
        assert_eq!(report.metric_values[0].metric, STATUS_METRIC);
        assert_eq!(report.metric_values[0].value, -1.0);
        assert_eq!(report.metric_values[1].metric, LATENCY_METRIC);
        assert_eq!(report.metric_values[1].value, 42.5);
        assert_eq!(report.metric_values[1].endpoint, "cluster-abc");

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("sessionid").is_some());
        assert!(json.get("metricvalues").is_some());
        assert_eq!(json["metricvalues"][0]["metrictype"], "gauge");
    }

    #[tokio::test]
    async fn send_reports_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reporter = TelemetryReporter::new(format!("http://{addr}/api/update"), "t")
            .with_timeout(Duration::from_secs(2));
        let report = reporter.build_report(&sample());
        assert!(matches!(
            reporter.send(&report).await,
            Err(TelemetryError::Http(_))
        ));
    }

    #[tokio::test]
    async fn send_surfaces_invalid_count() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = r#"{"Total":2,"Invalid":1,"Message":"bad tags","SessionId":"s"}"#;
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(resp.as_bytes()).await.unwrap();
        });

        let reporter = TelemetryReporter::new(format!("http://{addr}/api/update"), "t");
        let report = reporter.build_report(&sample());
        match reporter.send(&report).await {
            Err(TelemetryError::Invalid(msg)) => assert_eq!(msg, "bad tags"),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn report_without_runtime_is_dropped() {
        let reporter = TelemetryReporter::new("http://127.0.0.1:1/api/update", "t");
        reporter.report(sample());
    }
}
