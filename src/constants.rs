//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the `ManagedServiceAccount` resource and its annotations
pub const API_GROUP: &str = "authentication.open-cluster-management.io";

/// Field manager recorded on every write the controller performs
pub const FIELD_MANAGER: &str = "managed-serviceaccount-controller";

/// Finalizer guarding cleanup of the token secret and managed-side identity
pub const CLEANUP_FINALIZER: &str = "authentication.open-cluster-management.io/cleanup";

/// Label placed on token secrets and managed-side service accounts
pub const MANAGED_LABEL: &str = "authentication.open-cluster-management.io/is-managed-serviceaccount";

/// Label selector matching objects carrying [`MANAGED_LABEL`]
pub const MANAGED_LABEL_SELECTOR: &str =
    "authentication.open-cluster-management.io/is-managed-serviceaccount=true";

/// Well-known key holding the token bytes inside the token secret
pub const TOKEN_KEY: &str = "token";

/// Key holding the managed cluster CA bundle inside the token secret
pub const CA_BUNDLE_KEY: &str = "ca.crt";

/// Annotation carrying the token expiry (RFC3339)
pub const EXPIRATION_ANNOTATION: &str =
    "authentication.open-cluster-management.io/expiration-timestamp";

/// Annotation carrying the identity the token authenticates as
pub const SERVICE_ACCOUNT_ANNOTATION: &str =
    "authentication.open-cluster-management.io/service-account";

/// Default validity used when rotation is disabled (360 days)
pub const DEFAULT_TOKEN_VALIDITY: &str = "8640h";

/// Smallest validity the TokenRequest API accepts (seconds)
pub const MIN_TOKEN_VALIDITY_SECS: u64 = 600;

/// Largest validity the controller will request (seconds)
pub const MAX_TOKEN_VALIDITY_SECS: u64 = u32::MAX as u64;

/// Rotation fires once `validity / ROTATION_MARGIN_DIVISOR` remains before expiry
pub const ROTATION_MARGIN_DIVISOR: u32 = 5;

/// Default namespace the addon agent installs managed-side identities into
pub const DEFAULT_INSTALL_NAMESPACE: &str = "open-cluster-management-managed-serviceaccount";

/// Default hub namespace (managed cluster name) watched by the controller
pub const DEFAULT_CLUSTER_NAME: &str = "cluster1";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Attempts allowed for a secret write that hits optimistic-concurrency conflicts
pub const DEFAULT_CONFLICT_RETRY_LIMIT: u32 = 3;

/// Default size of the reconcile worker pool
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default delay before restarting the controller stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
