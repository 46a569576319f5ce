//! Time-limited credentials and the providers that load them.
//!
//! The reconciler loads a bundle at startup (fatal on failure) and again
//! shortly before each expiry; see [`rotation_delay`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::api::ApiFuture;
use crate::error::CloudError;

pub const ENV_ACCESS_PUBKEY: &str = "FLEETSCALE_ACCESS_PUBKEY";
pub const ENV_ACCESS_PRIKEY: &str = "FLEETSCALE_ACCESS_PRIKEY";
pub const ENV_SECURITY_TOKEN: &str = "FLEETSCALE_SECURITY_TOKEN";

/// Access keys plus the instant they stop being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub public_key: String,
    pub private_key: String,
    pub security_token: Option<String>,
    pub expires_at: SystemTime,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("security_token", &self.security_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where and on whose behalf API calls are made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiConfig {
    pub region: String,
    pub project_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub credential: Credential,
    pub api: ApiConfig,
}

/// Supplies credentials for a role.
pub trait CredentialProvider: Send + Sync {
    fn load<'a>(&'a self, role: &'a str) -> ApiFuture<'a, CredentialBundle>;
}

/// How long to wait before rotating a credential that expires at
/// `expires_at`. Zero when expiry is already within `grace`.
pub fn rotation_delay(expires_at: SystemTime, grace: Duration, now: SystemTime) -> Duration {
    expires_at
        .duration_since(now)
        .unwrap_or(Duration::ZERO)
        .saturating_sub(grace)
}

// ── Environment ───────────────────────────────────────────────────

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads long-lived access keys from the environment and stamps them with
/// a fixed lifetime so they are re-read periodically.
#[derive(Clone)]
pub struct EnvCredentialProvider {
    api: ApiConfig,
    lifetime: Duration,
    lookup: EnvLookup,
}

impl EnvCredentialProvider {
    pub fn new(api: ApiConfig, lifetime: Duration) -> Self {
        Self {
            api,
            lifetime,
            lookup: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace the process environment with `lookup`.
    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lookup = Arc::new(lookup);
        self
    }

    fn read(&self, role: &str) -> Result<CredentialBundle, CloudError> {
        let get = |key: &str| (self.lookup)(key).filter(|v| !v.is_empty());

        let public_key = get(ENV_ACCESS_PUBKEY)
            .ok_or_else(|| CloudError::Credential(format!("{ENV_ACCESS_PUBKEY} is not set")))?;
        let private_key = get(ENV_ACCESS_PRIKEY)
            .ok_or_else(|| CloudError::Credential(format!("{ENV_ACCESS_PRIKEY} is not set")))?;
        if self.api.region.is_empty() {
            return Err(CloudError::Credential("region is not configured".to_string()));
        }

        debug!(%role, lifetime = ?self.lifetime, "loaded credential from environment");
        Ok(CredentialBundle {
            credential: Credential {
                public_key,
                private_key,
                security_token: get(ENV_SECURITY_TOKEN),
                expires_at: SystemTime::now() + self.lifetime,
            },
            api: self.api.clone(),
        })
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn load<'a>(&'a self, role: &'a str) -> ApiFuture<'a, CredentialBundle> {
        Box::pin(async move { self.read(role) })
    }
}

// ── Static ────────────────────────────────────────────────────────

/// Always returns the same bundle, refreshing its expiry on each load when
/// a lifetime is set.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    bundle: CredentialBundle,
    lifetime: Option<Duration>,
}

impl StaticCredentialProvider {
    pub fn new(bundle: CredentialBundle) -> Self {
        Self {
            bundle,
            lifetime: None,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// A bundle with placeholder keys for the given API config.
    pub fn for_api(api: ApiConfig, lifetime: Duration) -> Self {
        Self::new(CredentialBundle {
            credential: Credential {
                public_key: "static-public".to_string(),
                private_key: "static-private".to_string(),
                security_token: None,
                expires_at: SystemTime::now() + lifetime,
            },
            api,
        })
        .with_lifetime(lifetime)
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn load<'a>(&'a self, _role: &'a str) -> ApiFuture<'a, CredentialBundle> {
        Box::pin(async move {
            let mut bundle = self.bundle.clone();
            if let Some(lifetime) = self.lifetime {
                bundle.credential.expires_at = SystemTime::now() + lifetime;
            }
            Ok(bundle)
        })
    }
}
