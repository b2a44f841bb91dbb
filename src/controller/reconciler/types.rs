//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::identity::{IdentityError, IdentityProvisioner};
use crate::observability;
use crate::secret::{SecretError, SecretSynchronizer};
use crate::token::{TokenError, TokenRequester};
use super::status::{StatusError, StatusReporter};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

/// Errors that leave a reconcile to the error policy
///
/// Fatal errors are not represented here: they are persisted as the `Failed`
/// phase and the reconcile returns normally, waiting for a spec change.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// A dependency is not there yet; retry with backoff, no failure status
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("transient error: {0}")]
    Transient(String),
    /// Secret writes kept conflicting past the immediate retry budget
    #[error("secret {secret} still conflicting after {attempts} attempts")]
    ConflictExhausted { secret: String, attempts: u32 },
    #[error("invalid resource: {0}")]
    InvalidResource(String),
}

impl ReconcilerError {
    /// Label used for requeue metrics
    #[must_use]
    pub fn requeue_reason(&self) -> &'static str {
        match self {
            ReconcilerError::NotReady(_) => "not-ready",
            ReconcilerError::Transient(_) => "transient",
            ReconcilerError::ConflictExhausted { .. } => "conflict",
            ReconcilerError::InvalidResource(_) => "invalid-resource",
        }
    }
}

impl From<IdentityError> for ReconcilerError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::NotReady(identity) => ReconcilerError::NotReady(format!(
                "identity {identity} does not exist yet"
            )),
            other => ReconcilerError::Transient(other.to_string()),
        }
    }
}

impl From<TokenError> for ReconcilerError {
    fn from(error: TokenError) -> Self {
        ReconcilerError::Transient(error.to_string())
    }
}

impl From<SecretError> for ReconcilerError {
    fn from(error: SecretError) -> Self {
        ReconcilerError::Transient(error.to_string())
    }
}

impl From<StatusError> for ReconcilerError {
    fn from(error: StatusError) -> Self {
        ReconcilerError::Transient(error.to_string())
    }
}

/// Trigger source for reconciliation
/// Tracks why a reconciliation was triggered for better debugging and observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Request created, updated, or an owned secret changed
    Watch,
    /// Requeue scheduled for token rotation
    RotationTimer,
    /// Error backoff retry
    ErrorBackoff,
    /// Reconciliation of pre-existing requests at startup
    Startup,
}

impl TriggerSource {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Watch => "watch",
            TriggerSource::RotationTimer => "rotation-timer",
            TriggerSource::ErrorBackoff => "error-backoff",
            TriggerSource::Startup => "startup",
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            backoff: ExponentialBackoff::new(
                config.backoff_start_duration(),
                config.backoff_max_duration(),
            ),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciler context shared by every worker
#[derive(Clone)]
pub struct Reconciler {
    pub identities: Arc<dyn IdentityProvisioner>,
    pub tokens: Arc<dyn TokenRequester>,
    pub secrets: Arc<dyn SecretSynchronizer>,
    pub status: Arc<dyn StatusReporter>,
    pub config: ControllerConfig,
    // Backoff state per resource (identified by namespace/name)
    // Lives in the error_policy() layer so a failing request never delays another
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    // Requests currently in the Failed phase, for the failed_requests gauge
    pub failed_requests: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cluster_name", &self.config.cluster_name)
            .field("install_namespace", &self.config.install_namespace)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityProvisioner>,
        tokens: Arc<dyn TokenRequester>,
        secrets: Arc<dyn SecretSynchronizer>,
        status: Arc<dyn StatusReporter>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            identities,
            tokens,
            secrets,
            status,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            failed_requests: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Forget the error history of a request after a successful reconcile
    pub fn reset_backoff(&self, resource_key: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                if let Some(state) = states.get_mut(resource_key) {
                    state.reset();
                }
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }

    /// Drop all per-request state of a deleted request
    pub fn forget(&self, resource_key: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                states.remove(resource_key);
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
        self.set_failed(resource_key, false);
    }

    /// Track whether a request is in the Failed phase
    pub fn set_failed(&self, resource_key: &str, failed: bool) {
        match self.failed_requests.lock() {
            Ok(mut failed_requests) => {
                let changed = if failed {
                    failed_requests.insert(resource_key.to_string())
                } else {
                    failed_requests.remove(resource_key)
                };
                if changed {
                    observability::metrics::set_failed_requests(
                        i64::try_from(failed_requests.len()).unwrap_or(i64::MAX),
                    );
                }
            }
            Err(e) => warn!("Failed to lock failed_requests: {}", e),
        }
    }

    /// Error count of a request, for tests and diagnostics
    #[must_use]
    pub fn error_count(&self, resource_key: &str) -> u32 {
        self.backoff_states
            .lock()
            .ok()
            .and_then(|states| states.get(resource_key).map(|s| s.error_count))
            .unwrap_or(0)
    }
}
