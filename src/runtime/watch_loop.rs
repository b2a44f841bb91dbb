//! # Watch Loop
//!
//! Controller watch loop that monitors `ManagedServiceAccount` requests and the
//! token secrets they own, and triggers reconciliation when either changes.

use crate::config::SharedControllerConfig;
use crate::constants::MANAGED_LABEL_SELECTOR;
use crate::controller::reconciler::rotation::refresh_at;
use crate::controller::reconciler::validation::effective_validity;
use crate::controller::reconciler::{reconcile, Reconciler, ReconcilerError, TriggerSource};
use crate::controller::server::ServerState;
use crate::crd::ManagedServiceAccount;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::{controller, controller::Action, watcher, Controller};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Run the controller watch loop
///
/// Watches requests in the cluster namespace plus the labelled token secrets
/// they own, so deleting or editing a secret wakes its owner. Reconciles run
/// on a bounded worker pool and never overlap for the same request. The
/// stream restarts after watch errors until SIGINT or SIGTERM arrives.
pub async fn run_watch_loop(
    requests: Api<ManagedServiceAccount>,
    secrets: Api<Secret>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let config = controller_config.read().await;
    let backoff_start_ms = config.backoff_start_ms;
    let concurrency = config.max_concurrent_reconciliations;
    drop(config);

    let backoff_duration_ms = Arc::new(AtomicU64::new(backoff_start_ms));

    // Readiness drops before any controller starts shutting down
    let shutdown = shutdown_trigger(wait_for_signal(), Arc::clone(&server_state));

    loop {
        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff_clone = Arc::clone(&backoff_duration_ms);
        let controller_config_for_filter = Arc::clone(&controller_config);
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );
        let _watch_guard = watch_span.enter();

        let controller_future = Controller::new(requests.clone(), watcher::Config::default())
            .owns(
                secrets.clone(),
                watcher::Config::default().labels(MANAGED_LABEL_SELECTOR),
            )
            .with_config(controller::Config::default().concurrency(concurrency))
            .graceful_shutdown_on(shutdown.clone())
            .run(
                create_reconcile_fn,
                |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                Arc::clone(&reconciler),
            )
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff_clone);
                let config_clone = Arc::clone(&controller_config_for_filter);
                async move {
                    match &x {
                        Ok(_) => {
                            let backoff_start = config_clone.read().await.backoff_start_ms;
                            backoff.store(backoff_start, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            let config = config_clone.read().await;
                            let max_backoff = config.backoff_max_ms;
                            let watch_restart_delay = config.watch_restart_delay_secs;
                            drop(config);
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                max_backoff,
                                watch_restart_delay,
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()));

        controller_future.await;

        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay_secs = controller_config.read().await.watch_restart_delay_secs;
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay_secs
        );
        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_secs(delay_secs)) => {}
            () = shutdown.clone() => {}
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Shared shutdown future handed to every controller the loop starts
///
/// Clears readiness as soon as `signal` resolves, then resolves itself. Once
/// resolved, every clone resolves immediately.
pub(crate) fn shutdown_trigger<F>(
    signal: F,
    server_state: Arc<ServerState>,
) -> Shared<BoxFuture<'static, ()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    async move {
        signal.await;
        server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    }
    .boxed()
    .shared()
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating graceful shutdown..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler, listening for SIGINT only: {}", e),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT, initiating graceful shutdown...");
}

/// Create the reconciliation future for one controller event
fn create_reconcile_fn(
    obj: Arc<ManagedServiceAccount>,
    ctx: Arc<Reconciler>,
) -> impl std::future::Future<Output = Result<Action, ReconcilerError>> + Send {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let trigger_source = detect_trigger_source(&obj, &ctx, Utc::now());

    async move {
        debug!(
            resource.name = name.as_str(),
            resource.namespace = namespace.as_str(),
            generation = obj.metadata.generation.unwrap_or(0),
            trigger_source = trigger_source.as_str(),
            "watch.event.received"
        );

        let result = reconcile(obj, ctx, trigger_source).await;

        match &result {
            Ok(action) => {
                debug!(resource.name = name.as_str(), action = ?action, "watch.event.reconciled");
            }
            Err(e) => {
                error!(resource.name = name.as_str(), error = %e, "watch.event.reconciliation_failed");
            }
        }

        result
    }
}

/// Classify why a reconcile was scheduled, for logs only
pub(crate) fn detect_trigger_source(
    msa: &ManagedServiceAccount,
    ctx: &Reconciler,
    now: DateTime<Utc>,
) -> TriggerSource {
    let resource_key = format!(
        "{}/{}",
        msa.namespace().unwrap_or_default(),
        msa.name_any()
    );
    if ctx.error_count(&resource_key) > 0 {
        return TriggerSource::ErrorBackoff;
    }

    let expiry = msa
        .status
        .as_ref()
        .and_then(|s| s.expiration_timestamp.as_deref())
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc));
    let Some(expiry) = expiry else {
        return TriggerSource::Watch;
    };

    let due = if msa.spec.rotation.enabled {
        effective_validity(&msa.spec.rotation, &ctx.config.default_token_validity)
            .is_ok_and(|validity| now >= refresh_at(expiry, validity))
    } else {
        now >= expiry
    };

    if due {
        TriggerSource::RotationTimer
    } else {
        TriggerSource::Watch
    }
}
