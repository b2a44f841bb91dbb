//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::ManagedServiceAccount;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with exponential backoff
///
/// Backoff state is tracked per resource, so one failing request never delays
/// another. The delay is returned as a requeue; no thread ever sleeps on it.
pub fn handle_reconciliation_error(
    obj: Arc<ManagedServiceAccount>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    match error {
        ReconcilerError::NotReady(_) => warn!("Reconciliation waiting for dependency: {}", error),
        _ => error!("Reconciliation error for {}: {}", name, error),
    }
    observability::metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let (delay, error_count) = next_backoff(&ctx, &resource_key);

    info!(
        "Retrying in {}ms (error count: {}, reason: {}, trigger source: error-backoff)",
        delay.as_millis(),
        error_count,
        error.requeue_reason()
    );

    observability::metrics::increment_requeues_total(error.requeue_reason());
    Action::requeue(delay)
}

/// Advance the backoff of one resource and return the delay to use
pub fn next_backoff(ctx: &Reconciler, resource_key: &str) -> (Duration, u32) {
    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(resource_key.to_string())
                .or_insert_with(|| BackoffState::new(&ctx.config));
            state.increment_error();
            (state.backoff.next_backoff(), state.error_count)
        }
        Err(e) => {
            warn!(
                "Failed to lock backoff_states: {}, using default backoff",
                e
            );
            (ctx.config.backoff_max_duration(), 0)
        }
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    // 404 first: a plain-text 404 body surfaces as a serde error mentioning other codes
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        error!("Watch authentication failed (401 Unauthorized) - hub credentials may have been revoked");
        error!("Verify the controller can still list ManagedServiceAccounts and Secrets in its cluster namespace");
        warn!(
            "Waiting {}s before retrying watch...",
            watch_restart_delay_secs
        );
        tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
        None
    } else if is_410 {
        warn!("Watch resource version expired (410), watch will restart");
        None
    } else if is_429 {
        let current_backoff = backoff.load(Ordering::Relaxed);
        warn!(
            "API server throttling (429), backing off for {}ms before restart...",
            current_backoff
        );
        tokio::time::sleep(Duration::from_millis(current_backoff)).await;
        let new_backoff = std::cmp::min(current_backoff.saturating_mul(2), max_backoff_ms);
        backoff.store(new_backoff, Ordering::Relaxed);
        None
    } else if is_not_found {
        warn!(
            "Watched object not found (404) - it may have been deleted or the CRD is missing. Error: {}",
            error_string
        );
        Some(())
    } else {
        error!("Controller stream error: {}", error_string);
        tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
        None
    }
}
