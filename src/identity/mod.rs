//! # Identity Provisioning
//!
//! Ensures the managed-side `ServiceAccount` a request's tokens authenticate as.
//!
//! The reconciler derives the canonical identity from the request
//! ([`IdentityRef::for_request`]) and asks an [`IdentityProvisioner`] to make
//! sure it exists. The provisioner is created once and reused across rotations.

mod service_account;

pub use service_account::ServiceAccountProvisioner;

use async_trait::async_trait;
use thiserror::Error;

/// Namespaced name of a managed-side service identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityRef {
    pub namespace: String,
    pub name: String,
}

impl IdentityRef {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Canonical identity for a request: same name, in the install namespace
    ///
    /// Each hub request namespace maps to exactly one managed cluster, so the
    /// request name alone is unique within that cluster's install namespace.
    #[must_use]
    pub fn for_request(install_namespace: &str, request_name: &str) -> Self {
        Self::new(install_namespace, request_name)
    }

    /// Kubernetes username the identity's tokens authenticate as
    #[must_use]
    pub fn username(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity provisioning errors
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The identity (or its namespace) is not there yet
    #[error("identity {0} is not ready")]
    NotReady(String),
    /// The controller may not manage identities on the managed cluster
    #[error("forbidden to manage identity {identity}: {message}")]
    Forbidden { identity: String, message: String },
    #[error("transient identity error: {0}")]
    Transient(String),
}

/// Managed-side identity lifecycle
#[async_trait]
pub trait IdentityProvisioner: Send + Sync {
    /// Create the identity if it is absent; succeed when it is present
    async fn ensure_identity(&self, identity: &IdentityRef) -> Result<(), IdentityError>;

    async fn identity_exists(&self, identity: &IdentityRef) -> Result<bool, IdentityError>;

    /// Delete the identity; deleting an absent identity succeeds
    async fn remove_identity(&self, identity: &IdentityRef) -> Result<(), IdentityError>;
}
