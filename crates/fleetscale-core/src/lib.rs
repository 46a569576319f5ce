//! fleetscale-core — configuration shared by every fleetscale crate.
//!
//! Holds the `fleetscale.toml` schema, the duration grammar used across
//! the config (`"30s"`, `"5m"`, `"500ms"`, `"1h"`), and the parser for
//! node-group auto-discovery specs. Also hosts the small HTTP/1 JSON
//! transport shared by the compute API client and the telemetry reporter.

pub mod config;
pub mod discovery;
pub mod duration;
pub mod error;
pub mod transport;

pub use config::{
    ApiSection, ClusterSection, CredentialsSection, FleetConfig, MetricsSection, RefreshSection,
    DEFAULT_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL, checked_refresh_interval,
};
pub use discovery::AutoDiscoverySpec;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use transport::{HttpError, HttpResponse, post_json};
