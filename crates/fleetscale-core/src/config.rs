//! fleetscale.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::discovery::AutoDiscoverySpec;
use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

/// Refresh cadence used when nothing (valid) is configured.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest refresh cadence accepted from configuration.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

const ENV_CLUSTER_ID: &str = "FLEETSCALE_CLUSTER_ID";
const ENV_REGION_ID: &str = "FLEETSCALE_REGION_ID";
const ENV_PROJECT_ID: &str = "FLEETSCALE_PROJECT_ID";

/// Returns the interval if it satisfies the minimum-interval floor.
pub fn checked_refresh_interval(interval: Duration) -> Option<Duration> {
    (interval >= MIN_REFRESH_INTERVAL).then_some(interval)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub cluster: ClusterSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub project_id: String,
    /// Scheme part of node provider ids (`<scheme>://<zone>//<node-id>`).
    #[serde(default = "default_provider_scheme")]
    pub provider_scheme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshSection {
    pub interval: Option<String>,
    #[serde(default)]
    pub auto_discovery: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsSection {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_grace")]
    pub grace: String,
    /// Lifetime assigned to long-lived keys that carry no expiry of their own.
    #[serde(default = "default_lifetime")]
    pub lifetime: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSection {
    pub report_endpoint: Option<String>,
    pub report_token: Option<String>,
}

fn default_provider_scheme() -> String {
    "fleetscale".to_string()
}

fn default_endpoint() -> String {
    "http://api.service.fleetscale.internal".to_string()
}

fn default_timeout() -> String {
    "10s".to_string()
}

fn default_role() -> String {
    "FleetscaleServiceRole".to_string()
}

fn default_grace() -> String {
    "30s".to_string()
}

fn default_lifetime() -> String {
    "1h".to_string()
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout: default_timeout(),
        }
    }
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            role: default_role(),
            grace: default_grace(),
            lifetime: default_lifetime(),
        }
    }
}

impl FleetConfig {
    /// Load, apply environment overrides, and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Fill empty cluster fields from the environment.
    ///
    /// Values present in the file win over the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |field: &mut String, key: &str| {
            if field.is_empty()
                && let Some(value) = lookup(key)
            {
                *field = value;
            }
        };
        fill(&mut self.cluster.id, ENV_CLUSTER_ID);
        fill(&mut self.cluster.region, ENV_REGION_ID);
        fill(&mut self.cluster.project_id, ENV_PROJECT_ID);
    }

    /// Check required fields and every duration / discovery string.
    pub fn validate(&self) -> ConfigResult<()> {
        let required = [
            ("cluster.id", &self.cluster.id),
            ("cluster.region", &self.cluster.region),
            ("cluster.project_id", &self.cluster.project_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} is required")));
            }
        }

        let durations = [
            ("api.timeout", self.api.timeout.as_str()),
            ("credentials.grace", self.credentials.grace.as_str()),
            ("credentials.lifetime", self.credentials.lifetime.as_str()),
        ];
        for (name, value) in durations {
            if parse_duration(value).is_none() {
                return Err(ConfigError::Invalid(format!("{name}: bad duration {value:?}")));
            }
        }

        if let Some(interval) = &self.refresh.interval
            && parse_duration(interval).is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "refresh.interval: bad duration {interval:?}"
            )));
        }

        for spec in &self.refresh.auto_discovery {
            AutoDiscoverySpec::parse(spec)?;
        }
        Ok(())
    }

    /// Effective refresh cadence.
    ///
    /// Starts from the default, applies `refresh.interval`, then any
    /// auto-discovery override. Values under the floor keep what was there.
    pub fn refresh_interval(&self) -> Duration {
        let mut interval = DEFAULT_REFRESH_INTERVAL;

        if let Some(raw) = &self.refresh.interval
            && let Some(parsed) = parse_duration(raw)
        {
            match checked_refresh_interval(parsed) {
                Some(accepted) => interval = accepted,
                None => warn!(
                    configured = ?parsed,
                    default = ?interval,
                    "refresh.interval below the 30 second floor, keeping default"
                ),
            }
        }

        for raw in &self.refresh.auto_discovery {
            if let Ok(spec) = AutoDiscoverySpec::parse(raw)
                && let Some(accepted) = spec.refresh_interval()
            {
                interval = accepted;
            }
        }
        interval
    }

    pub fn api_timeout(&self) -> Duration {
        parse_duration(&self.api.timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn credential_grace(&self) -> Duration {
        parse_duration(&self.credentials.grace).unwrap_or(Duration::from_secs(30))
    }

    pub fn credential_lifetime(&self) -> Duration {
        parse_duration(&self.credentials.lifetime).unwrap_or(Duration::from_secs(3600))
    }
}
