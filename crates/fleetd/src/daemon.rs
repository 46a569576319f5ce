//! Daemon assembly: builds the provider stack, runs the refresh poll loop
//! and the REST server until Ctrl-C.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleetscale_cloud::{
    ApiConfig, ClusterSeed, CredentialProvider, EnvCredentialProvider,
    HttpComputeClient, InMemoryComputeApi, StaticCredentialProvider,
};
use fleetscale_core::FleetConfig;
use fleetscale_metrics::{ApiCallCollector, FanoutSink, MetricsSink, TelemetryReporter};
use fleetscale_provider::{CloudProvider, ReconciliationManager};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Config used by `fleetd simulate` when no file is given.
const SIMULATION_CONFIG: &str = r#"
[cluster]
id = "sim-cluster"
region = "sim-region"
project_id = "sim-project"

[api]
endpoint = "memory://simulated"
"#;

/// Where remote compute calls go.
pub enum Backend {
    Remote,
    Simulated(ClusterSeed),
}

pub struct DaemonOptions {
    pub config: FleetConfig,
    pub backend: Backend,
    pub port: u16,
    /// Poll loop wake-up period in seconds.
    pub poll_interval: u64,
}

/// A connected provider and the collector its API calls report to.
pub struct Stack {
    pub provider: Arc<CloudProvider>,
    pub collector: ApiCallCollector,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    let config = match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let config = FleetConfig::from_toml_str(SIMULATION_CONFIG)?;
            config.validate()?;
            config
        }
    };
    info!(
        cluster = %config.cluster.id,
        region = %config.cluster.region,
        refresh_interval = ?config.refresh_interval(),
        "config loaded"
    );
    Ok(config)
}

pub fn load_seed(path: &Path) -> anyhow::Result<ClusterSeed> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed {}", path.display()))?;
    let seed: ClusterSeed = serde_json::from_str(&content)
        .with_context(|| format!("parsing seed {}", path.display()))?;
    info!(
        groups = seed.groups.len(),
        nodes = seed.nodes.len(),
        enabled = seed.enabled,
        "simulation seed loaded"
    );
    Ok(seed)
}

/// The sink every API call reports to: the in-process collector, plus a
/// telemetry push when an endpoint is configured.
pub fn metrics_sink(config: &FleetConfig, collector: &ApiCallCollector) -> Arc<dyn MetricsSink> {
    let collector: Arc<dyn MetricsSink> = Arc::new(collector.clone());
    let Some(endpoint) = &config.metrics.report_endpoint else {
        return collector;
    };

    let reporter = TelemetryReporter::new(
        endpoint.clone(),
        config.metrics.report_token.clone().unwrap_or_default(),
    )
    .with_timeout(config.api_timeout())
    .with_version(env!("CARGO_PKG_VERSION"));
    info!(endpoint = %reporter.endpoint(), "telemetry reporting enabled");
    Arc::new(FanoutSink::new().with(collector).with(Arc::new(reporter)))
}

/// Connect the manager and wrap it in a provider. Fails if the initial
/// credential load or the first refresh fails.
pub async fn build_stack(config: &FleetConfig, backend: Backend) -> anyhow::Result<Stack> {
    let collector = ApiCallCollector::new();
    let sink = metrics_sink(config, &collector);
    let api = ApiConfig {
        region: config.cluster.region.clone(),
        project_id: config.cluster.project_id.clone(),
        endpoint: config.api.endpoint.clone(),
    };

    let (credentials, factory) = match backend {
        Backend::Remote => {
            let credentials: Arc<dyn CredentialProvider> =
                Arc::new(EnvCredentialProvider::new(api, config.credential_lifetime()));
            (credentials, HttpComputeClient::factory(config.api_timeout()))
        }
        Backend::Simulated(seed) => {
            let credentials: Arc<dyn CredentialProvider> =
                Arc::new(StaticCredentialProvider::for_api(api, config.credential_lifetime()));
            (credentials, InMemoryComputeApi::from_seed(seed).factory())
        }
    };

    let manager = ReconciliationManager::connect(config, credentials, factory, sink)
        .await
        .context("connecting reconciliation manager")?;
    Ok(Stack {
        provider: Arc::new(CloudProvider::new(manager)),
        collector,
    })
}

/// Call the cadence-gated refresh every `interval` until shutdown.
pub async fn run_poll_loop(
    provider: Arc<CloudProvider>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "refresh loop started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match provider.refresh().await {
                    Ok(()) => debug!(groups = provider.node_groups().len(), "refresh tick"),
                    Err(e) => error!(error = %e, "refresh failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("refresh loop shutting down");
                break;
            }
        }
    }
}

pub async fn run(opts: DaemonOptions) -> anyhow::Result<()> {
    let simulated = matches!(opts.backend, Backend::Simulated(_));
    info!(simulated, "fleetd starting");

    let Stack {
        provider,
        collector,
    } = build_stack(&opts.config, opts.backend).await?;
    info!(groups = provider.node_groups().len(), "provider ready");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    provider.start_credential_rotation();
    let poll_handle = tokio::spawn(run_poll_loop(
        provider.clone(),
        Duration::from_secs(opts.poll_interval.max(1)),
        shutdown_rx,
    ));

    // ── API server ─────────────────────────────────────────────

    let router = fleetscale_api::build_router(provider.clone(), collector);
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = poll_handle.await;
    provider.cleanup()?;

    info!("fleetd stopped");
    Ok(())
}

/// The template node of `group_id`, pretty-printed.
pub async fn template(config: &FleetConfig, backend: Backend, group_id: &str) -> anyhow::Result<String> {
    let stack = build_stack(config, backend).await?;
    let template = stack
        .provider
        .node_group(group_id)?
        .template_node_info()?;
    Ok(serde_json::to_string_pretty(&template)?)
}
