//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use managed_serviceaccount::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (`ManagedServiceAccount`, `Rotation`, status types)
//! - The cluster-facing traits the reconciler is built on
//! - Reconciler types (`Reconciler`, `ReconcilerError`, etc.)
//! - Config types (`ControllerConfig`, `ServerConfig`)

// CRD types - most commonly used
pub use crate::crd::*;

// Traits at the cluster boundary
pub use crate::controller::reconciler::StatusReporter;
pub use crate::identity::{IdentityProvisioner, IdentityRef};
pub use crate::secret::{SecretRef, SecretSynchronizer};
pub use crate::token::{MintedToken, TokenRequester};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, BackoffState, Reconciler, ReconcilerError, TriggerSource,
};

// Config types - for configuration management
pub use crate::config::{
    ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig,
};

// Kubernetes-backed implementations
pub use crate::controller::reconciler::KubeStatusStore;
pub use crate::identity::ServiceAccountProvisioner;
pub use crate::secret::HubSecretStore;
pub use crate::token::ManagedTokenRequester;
