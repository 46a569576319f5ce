//! Node-group auto-discovery specs.
//!
//! Groups are always discovered from the remote control plane; an entry
//! only carries tuning labels. Format: `label:key=value[,key=value]`.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::checked_refresh_interval;
use crate::error::{ConfigError, ConfigResult};

/// Label overriding the registry refresh interval, in seconds.
pub const REFRESH_INTERVAL_LABEL: &str = "asg_refresh_interval";

/// A parsed `label:` auto-discovery spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoDiscoverySpec {
    pub labels: BTreeMap<String, String>,
}

impl AutoDiscoverySpec {
    /// Parse a single spec string.
    pub fn parse(spec: &str) -> ConfigResult<Self> {
        let body = spec.trim().strip_prefix("label:").ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unsupported auto-discovery spec {spec:?}: expected label:key=value"
            ))
        })?;

        let mut labels = BTreeMap::new();
        for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::Invalid(format!("auto-discovery label {pair:?} is not key=value"))
            })?;
            labels.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self { labels })
    }

    /// The refresh interval requested by this spec, if it is present and
    /// passes the minimum-interval floor.
    pub fn refresh_interval(&self) -> Option<Duration> {
        let raw = self.labels.get(REFRESH_INTERVAL_LABEL)?;
        let secs = match raw.parse::<u64>() {
            Ok(secs) => secs,
            Err(_) => {
                warn!(value = %raw, "ignoring non-numeric {REFRESH_INTERVAL_LABEL}");
                return None;
            }
        };

        let interval = checked_refresh_interval(Duration::from_secs(secs));
        match interval {
            Some(interval) => info!(
                secs = interval.as_secs(),
                "{REFRESH_INTERVAL_LABEL} set; effective cadence is max(interval, poll interval)"
            ),
            None => warn!(secs, "{REFRESH_INTERVAL_LABEL} below the 30 second floor, ignored"),
        }
        interval
    }
}
