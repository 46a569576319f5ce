//! ReconciliationManager — keeps the registry converged with the remote
//! control plane.
//!
//! One refresh cycle:
//! 1. describe the cluster's autoscaling groups
//! 2. if the remote autoscaler is disabled, flush the registry and fail
//! 3. otherwise replace the whole group set
//! 4. if any group is registered, rebuild every group's node set from one
//!    node listing
//!
//! `refresh()` is gated by the time since the last successful group
//! refresh, and overlapping calls collapse into a no-op. The API client is
//! an immutable [`ClientHandle`] swapped whole on credential rotation;
//! each operation captures the handle it started with.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use fleetscale_cloud::{
    ClusterRef, ComputeApi, ComputeApiFactory, CredentialBundle, CredentialProvider, RemoteNode,
    rotation_delay,
};
use fleetscale_core::{FleetConfig, checked_refresh_interval};
use fleetscale_metrics::MetricsSink;
use fleetscale_registry::{NodeGroupRegistry, NodeRecord, NodeStatus, ProviderId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::descriptor::build_descriptor;
use crate::error::{ProviderError, ProviderResult};

/// Shortest wait between two rotation attempts.
const MIN_ROTATION_DELAY: Duration = Duration::from_secs(1);

/// Static settings the manager runs with.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub cluster_id: String,
    pub region: String,
    pub project_id: String,
    pub endpoint: String,
    pub provider_scheme: String,
    pub role: String,
    pub grace: Duration,
    pub refresh_interval: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            cluster_id: config.cluster.id.clone(),
            region: config.cluster.region.clone(),
            project_id: config.cluster.project_id.clone(),
            endpoint: config.api.endpoint.clone(),
            provider_scheme: config.cluster.provider_scheme.clone(),
            role: config.credentials.role.clone(),
            grace: config.credential_grace(),
            refresh_interval: config.refresh_interval(),
        }
    }
}

/// An API client together with the credential it was built from.
pub struct ClientHandle {
    pub api: Arc<dyn ComputeApi>,
    pub bundle: CredentialBundle,
    pub cluster: ClusterRef,
}

impl ClientHandle {
    pub fn expires_at(&self) -> SystemTime {
        self.bundle.credential.expires_at
    }
}

pub struct ReconciliationManager {
    settings: ManagerSettings,
    registry: NodeGroupRegistry,
    credentials: Arc<dyn CredentialProvider>,
    factory: ComputeApiFactory,
    sink: Arc<dyn MetricsSink>,
    handle: RwLock<Arc<ClientHandle>>,
    refresh_interval: RwLock<Duration>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ReconciliationManager {
    /// Load the initial credential and run the first full refresh.
    ///
    /// A credential failure is returned as `ProviderError::Credential`;
    /// callers treat it as fatal.
    pub async fn connect(
        config: &FleetConfig,
        credentials: Arc<dyn CredentialProvider>,
        factory: ComputeApiFactory,
        sink: Arc<dyn MetricsSink>,
    ) -> ProviderResult<Arc<Self>> {
        let manager = Self::connect_lazy(config, credentials, factory, sink).await?;
        manager.force_refresh().await?;
        Ok(manager)
    }

    /// Like [`connect`](Self::connect) but without the first refresh.
    pub async fn connect_lazy(
        config: &FleetConfig,
        credentials: Arc<dyn CredentialProvider>,
        factory: ComputeApiFactory,
        sink: Arc<dyn MetricsSink>,
    ) -> ProviderResult<Arc<Self>> {
        let settings = ManagerSettings::from_config(config);
        let handle = load_handle(&settings, credentials.as_ref(), &factory, &sink).await?;
        info!(
            cluster = %settings.cluster_id,
            region = %handle.cluster.region,
            refresh_interval = ?settings.refresh_interval,
            "reconciliation manager connected"
        );

        Ok(Arc::new(Self {
            refresh_interval: RwLock::new(settings.refresh_interval),
            settings,
            registry: NodeGroupRegistry::new(),
            credentials,
            factory,
            sink,
            handle: RwLock::new(Arc::new(handle)),
            last_refresh: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &NodeGroupRegistry {
        &self.registry
    }

    /// The current client handle. Hold on to it for the whole operation.
    pub fn client(&self) -> Arc<ClientHandle> {
        self.handle.read().expect("client handle lock").clone()
    }

    pub fn refresh_interval(&self) -> Duration {
        *self.refresh_interval.read().expect("refresh interval lock")
    }

    /// Change the refresh cadence. Values under the 30 second floor are
    /// rejected and the current cadence is kept.
    pub fn set_refresh_interval(&self, interval: Duration) -> bool {
        match checked_refresh_interval(interval) {
            Some(accepted) => {
                *self.refresh_interval.write().expect("refresh interval lock") = accepted;
                info!(interval = ?accepted, "refresh interval updated");
                true
            }
            None => {
                warn!(requested = ?interval, "refresh interval below the floor, ignored");
                false
            }
        }
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        *self.last_refresh.lock().expect("last refresh lock")
    }

    fn refresh_due(&self) -> bool {
        match self.last_refresh() {
            Some(at) => at.elapsed() >= self.refresh_interval(),
            None => true,
        }
    }

    // ── Refresh ────────────────────────────────────────────────────

    /// Run a refresh cycle if the interval has elapsed since the last one.
    /// A no-op while another cycle is running.
    pub async fn refresh(&self) -> ProviderResult<()> {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!("refresh already in progress, skipping");
            return Ok(());
        };
        if !self.refresh_due() {
            return Ok(());
        }
        self.run_refresh().await
    }

    /// Run a refresh cycle now, waiting for any cycle in progress.
    pub async fn force_refresh(&self) -> ProviderResult<()> {
        let _guard = self.refresh_lock.lock().await;
        self.run_refresh().await
    }

    async fn run_refresh(&self) -> ProviderResult<()> {
        let handle = self.client();
        self.refresh_groups(&handle).await?;

        if !self.registry.is_empty() {
            self.refresh_nodes_with(&handle).await.inspect_err(|e| {
                error!(error = %e, "failed to refresh node list");
            })?;
        }
        Ok(())
    }

    async fn refresh_groups(&self, handle: &ClientHandle) -> ProviderResult<()> {
        let remote = handle
            .api
            .describe_autoscaler_groups(handle.cluster.clone())
            .await
            .inspect_err(|e| error!(error = %e, "failed to describe autoscaling groups"))?;

        if !remote.enabled {
            let flushed = self.registry.clear();
            warn!(flushed, "autoscaler disabled remotely, flushed all groups");
            return Err(ProviderError::AutoscalerDisabled);
        }

        let built: ProviderResult<Vec<_>> = remote
            .groups
            .iter()
            .map(|spec| build_descriptor(spec, &handle.cluster.region))
            .collect();
        let descriptors = match built {
            Ok(descriptors) => descriptors,
            Err(e) => {
                self.registry.clear();
                error!(error = %e, "cannot register autoscaling groups");
                return Err(e);
            }
        };

        let registered: Vec<String> = descriptors.iter().map(|d| d.id.clone()).collect();
        let unregistered = self.registry.replace_groups(descriptors);
        *self.last_refresh.lock().expect("last refresh lock") = Some(Instant::now());

        info!(
            registered = registered.len(),
            unregistered = unregistered.len(),
            groups = %registered.join(","),
            next_in = ?self.refresh_interval(),
            "refreshed autoscaling groups"
        );
        Ok(())
    }

    /// Rebuild every group's node set using the current client handle.
    pub async fn refresh_nodes(&self) -> ProviderResult<usize> {
        let handle = self.client();
        self.refresh_nodes_with(&handle).await
    }

    /// Rebuild every group's node set using `handle`. Returns the number
    /// of active nodes kept.
    pub async fn refresh_nodes_with(&self, handle: &ClientHandle) -> ProviderResult<usize> {
        let nodes = handle.api.list_nodes(handle.cluster.clone()).await?;
        let listed = nodes.len();
        let records: Vec<NodeRecord> = nodes.iter().filter_map(|n| self.to_record(n)).collect();
        let kept = self.registry.apply_node_list(records);
        info!(listed, kept, "refreshed node list");
        Ok(kept)
    }

    fn to_record(&self, node: &RemoteNode) -> Option<NodeRecord> {
        if node.node_id.is_empty() || node.asg_id.is_empty() {
            return None;
        }
        Some(NodeRecord {
            provider_id: ProviderId::new(&self.settings.provider_scheme, &node.zone, &node.node_id),
            name: node.instance_name.clone(),
            group_id: node.asg_id.clone(),
            status: NodeStatus::from(node.node_status.as_str()),
        })
    }

    // ── Credentials ────────────────────────────────────────────────

    /// Load a fresh credential and swap in a new client handle. On
    /// failure the current handle stays in place.
    pub async fn rotate_credentials(&self) -> ProviderResult<()> {
        let handle = load_handle(
            &self.settings,
            self.credentials.as_ref(),
            &self.factory,
            &self.sink,
        )
        .await?;
        let expires_at = handle.expires_at();
        *self.handle.write().expect("client handle lock") = Arc::new(handle);
        info!(
            expires_in = ?expires_at.duration_since(SystemTime::now()).unwrap_or_default(),
            "credential rotated"
        );
        Ok(())
    }

    /// Time until the held credential should be rotated.
    pub fn next_rotation_delay(&self) -> Duration {
        let expires_at = self.client().expires_at();
        rotation_delay(expires_at, self.settings.grace, SystemTime::now()).max(MIN_ROTATION_DELAY)
    }

    /// Rotate the credential shortly before each expiry until `shutdown`
    /// fires. Failed rotations are retried after the grace period.
    pub fn spawn_credential_rotation(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let retry = manager.settings.grace.max(MIN_ROTATION_DELAY);
            let mut delay = manager.next_rotation_delay();
            loop {
                debug!(delay = ?delay, "next credential rotation scheduled");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        delay = match manager.rotate_credentials().await {
                            Ok(()) => manager.next_rotation_delay(),
                            Err(e) => {
                                error!(error = %e, retry_in = ?retry, "credential rotation failed, keeping current credential");
                                retry
                            }
                        };
                    }
                    _ = shutdown.changed() => {
                        debug!("credential rotation shutting down");
                        break;
                    }
                }
            }
        })
    }
}

async fn load_handle(
    settings: &ManagerSettings,
    credentials: &dyn CredentialProvider,
    factory: &ComputeApiFactory,
    sink: &Arc<dyn MetricsSink>,
) -> ProviderResult<ClientHandle> {
    let bundle = credentials
        .load(&settings.role)
        .await
        .map_err(|e| ProviderError::Credential(e.to_string()))?;
    let api = factory(&bundle, Arc::clone(sink))?;

    let region = if bundle.api.region.is_empty() {
        settings.region.clone()
    } else {
        bundle.api.region.clone()
    };
    Ok(ClientHandle {
        api,
        cluster: ClusterRef::new(region, settings.cluster_id.clone()),
        bundle,
    })
}
