//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server startup,
//! hub and managed cluster clients, and reconciler wiring.

use crate::client::{connect, ClusterConnection};
use crate::config::{create_shared_config, ControllerConfig, SharedControllerConfig, SharedServerConfig};
use crate::controller::reconciler::{reconcile, KubeStatusStore, Reconciler, TriggerSource};
use crate::controller::server::{start_server, ServerState};
use crate::crd::ManagedServiceAccount;
use crate::identity::ServiceAccountProvisioner;
use crate::observability;
use crate::secret::HubSecretStore;
use crate::token::ManagedTokenRequester;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// `ManagedServiceAccount` requests in the cluster namespace of the hub
    pub requests: Api<ManagedServiceAccount>,
    /// Token secrets in the cluster namespace of the hub
    pub secrets: Api<Secret>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Shared controller configuration
    pub controller_config: SharedControllerConfig,
    /// Shared server configuration
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Hub and managed cluster client creation
/// - Reconciler setup
/// - Reconcile existing requests
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let (controller_config, server_config) = create_shared_config();
    let config = controller_config.read().await.clone();

    init_tracing(&config);

    info!("Starting managed service account controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        cluster_name = config.cluster_name.as_str(),
        install_namespace = config.install_namespace.as_str(),
        split_topology = config.is_split_topology(),
        "Controller configuration loaded"
    );

    if config.enable_metrics {
        observability::metrics::register_metrics()?;
    } else {
        info!("Metrics collection disabled");
    }

    let server_state = Arc::new(ServerState::new());

    // Start the probe server and wait until it is bound
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.read().await.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, Arc::clone(&server_config)).await?;

    let hub = connect(config.hub_kubeconfig.as_deref(), "hub").await?;
    let managed = match config.managed_kubeconfig.as_deref() {
        Some(path) => connect(Some(path), "managed").await?,
        None => hub.clone(),
    };

    let requests: Api<ManagedServiceAccount> =
        Api::namespaced(hub.client.clone(), &config.cluster_name);
    let secrets: Api<Secret> = Api::namespaced(hub.client.clone(), &config.cluster_name);

    let reconciler = Arc::new(build_reconciler(&hub, &managed, config.clone()));

    // Requests created before the controller started are reconciled once up front
    reconcile_existing_requests(&requests, &reconciler)
        .await
        .context("Failed to reconcile existing requests")?;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        requests,
        secrets,
        reconciler,
        server_state,
        controller_config,
        server_config,
    })
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level. `LOG_FORMAT=json` switches to
/// structured output.
fn init_tracing(config: &ControllerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("managed_serviceaccount={},kube=warn", config.log_level).into()
    });

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Wire the reconciler to the hub and managed cluster clients
fn build_reconciler(
    hub: &ClusterConnection,
    managed: &ClusterConnection,
    config: ControllerConfig,
) -> Reconciler {
    Reconciler::new(
        Arc::new(ServiceAccountProvisioner::new(managed.client.clone())),
        Arc::new(ManagedTokenRequester::new(managed.client.clone())),
        Arc::new(HubSecretStore::new(
            hub.client.clone(),
            managed.ca_bundle.clone(),
        )),
        Arc::new(KubeStatusStore::new(hub.client.clone())),
        config,
    )
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: SharedServerConfig,
) -> Result<()> {
    let config = server_config.read().await;
    let startup_timeout = config.startup_timeout();
    let poll_interval = config.poll_interval();
    drop(config);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Reconcile requests that already exist before the watch starts
///
/// Failures are logged and left to the watch loop, which will see the same
/// requests again. Only an unreadable request list is reported.
async fn reconcile_existing_requests(
    requests: &Api<ManagedServiceAccount>,
    reconciler: &Arc<Reconciler>,
) -> Result<()> {
    let existing_span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.reconcile_existing",
        operation = "reconcile_existing_requests"
    );
    let _guard = existing_span.enter();

    let list = match requests.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
            return Ok(());
        }
    };

    if list.items.is_empty() {
        info!("No existing ManagedServiceAccount requests found, watch will pick up new ones");
        return Ok(());
    }

    log_startup_summary(&list.items);

    for item in &list.items {
        let name = item.name_any();
        let namespace = item.namespace().unwrap_or_default();

        match reconcile(
            Arc::new(item.clone()),
            Arc::clone(reconciler),
            TriggerSource::Startup,
        )
        .await
        {
            Ok(_) => {
                info!(
                    resource.name = name.as_str(),
                    resource.namespace = namespace.as_str(),
                    "reconciliation.success"
                );
            }
            Err(e) => {
                error!(
                    resource.name = name.as_str(),
                    resource.namespace = namespace.as_str(),
                    error = %e,
                    "reconciliation.error"
                );
            }
        }
    }

    info!(
        "Completed reconciliation of {} existing requests",
        list.items.len()
    );
    Ok(())
}

/// Tabulate existing requests by rotation mode for operators
fn log_startup_summary(items: &[ManagedServiceAccount]) {
    let mut by_mode: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for item in items {
        let mode = if item.spec.rotation.enabled {
            "rotating"
        } else {
            "fixed"
        };
        by_mode.entry(mode).or_default().push(item.name_any());
    }

    info!("Managed Service Account Controller - Startup Request Summary");
    info!("Total Requests: {}", items.len());
    for (mode, names) in &mut by_mode {
        names.sort();
        info!(
            "  {} ({}): {}",
            mode,
            names.len(),
            if names.len() <= 3 {
                names.join(", ")
            } else {
                format!("{}, ... ({} total)", names[..3].join(", "), names.len())
            }
        );
    }
}
