//! fleetscale-metrics — observability for remote compute API calls.
//!
//! Every remote call produces one `ApiCallSample`. Samples go to a
//! `MetricsSink`, which must never block or fail the caller.
//!
//! # Architecture
//!
//! ```text
//! MetricsSink (fire-and-forget)
//!   ├── ApiCallCollector   → per-action aggregates → render_prometheus()
//!   ├── TelemetryReporter  → spawned JSON push to a telemetry endpoint
//!   └── FanoutSink         → forwards to several sinks
//! ```

pub mod collector;
pub mod prometheus;
pub mod sink;
pub mod telemetry;

pub use collector::{ActionStats, ApiCallCollector};
pub use prometheus::render_prometheus;
pub use sink::{ApiCallSample, FanoutSink, LOCAL_FAILURE_STATUS, MetricsSink};
pub use telemetry::{TelemetryError, TelemetryReporter};
