//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_opt, env_var_or_default, env_var_or_default_bool, env_var_or_default_str};
use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_CLUSTER_NAME,
    DEFAULT_CONFLICT_RETRY_LIMIT, DEFAULT_INSTALL_NAMESPACE,
    DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_TOKEN_VALIDITY,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Hub namespace holding the `ManagedServiceAccount` requests for this managed cluster
    pub cluster_name: String,
    /// Managed-side namespace where service identities are created
    pub install_namespace: String,
    /// Kubeconfig for the hub cluster; `None` infers from the environment
    pub hub_kubeconfig: Option<String>,
    /// Kubeconfig for the managed cluster; `None` reuses the hub connection
    pub managed_kubeconfig: Option<String>,
    /// Token validity used when rotation is disabled (duration string)
    pub default_token_validity: String,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Attempts allowed for a secret write that keeps conflicting
    pub conflict_retry_limit: u32,
    /// Size of the reconcile worker pool
    pub max_concurrent_reconciliations: u16,
    /// Delay before restarting the controller stream after it ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Global log filter (used when `RUST_LOG` is unset)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            install_namespace: DEFAULT_INSTALL_NAMESPACE.to_string(),
            hub_kubeconfig: None,
            managed_kubeconfig: None,
            default_token_validity: DEFAULT_TOKEN_VALIDITY.to_string(),
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            conflict_retry_limit: DEFAULT_CONFLICT_RETRY_LIMIT,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            enable_metrics: true,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            cluster_name: env_var_or_default_str("CLUSTER_NAME", DEFAULT_CLUSTER_NAME),
            install_namespace: env_var_or_default_str(
                "INSTALL_NAMESPACE",
                DEFAULT_INSTALL_NAMESPACE,
            ),
            hub_kubeconfig: env_var_opt("HUB_KUBECONFIG"),
            managed_kubeconfig: env_var_opt("MANAGED_KUBECONFIG"),
            default_token_validity: env_var_or_default_str(
                "DEFAULT_TOKEN_VALIDITY",
                DEFAULT_TOKEN_VALIDITY,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            conflict_retry_limit: env_var_or_default(
                "CONFLICT_RETRY_LIMIT",
                DEFAULT_CONFLICT_RETRY_LIMIT,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", "info"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            enable_metrics: env_var_or_default_bool("ENABLE_METRICS", true),
        }
    }

    /// Get backoff start duration
    #[must_use]
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Whether tokens are minted against a separate managed cluster
    #[must_use]
    pub fn is_split_topology(&self) -> bool {
        self.managed_kubeconfig.is_some()
    }
}
