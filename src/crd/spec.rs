//! # ManagedServiceAccount Spec
//!
//! The request object: which identity to provision and how its token rotates.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::status::ManagedServiceAccountStatus;

/// ManagedServiceAccount Custom Resource Definition
///
/// Lives in the hub namespace named after a managed cluster. The controller
/// creates a `ServiceAccount` with the same name in the install namespace of
/// that managed cluster, mints a token for it, and mirrors the token into a
/// hub secret referenced from `status.tokenSecretRef`.
///
/// # Example
///
/// ```yaml
/// apiVersion: authentication.open-cluster-management.io/v1alpha1
/// kind: ManagedServiceAccount
/// metadata:
///   name: my-workload
///   namespace: cluster1
/// spec:
///   rotation:
///     enabled: true
///     validity: 720h0m0s
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "ManagedServiceAccount",
    group = "authentication.open-cluster-management.io",
    version = "v1alpha1",
    namespaced,
    status = "ManagedServiceAccountStatus",
    shortname = "msa",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"TokenReported", "type":"string", "jsonPath":".status.conditions[?(@.type==\"TokenReported\")].status"}"#,
    printcolumn = r#"{"name":"Expiration", "type":"string", "jsonPath":".status.expirationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceAccountSpec {
    /// Token rotation policy
    #[serde(default)]
    pub rotation: Rotation,
}

/// Token rotation policy
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    /// Re-mint the token before it expires and when the token secret goes missing
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lifetime of each minted token, e.g. "30m", "720h0m0s"
    /// Ignored when rotation is disabled; the controller default applies instead
    #[serde(default = "default_rotation_validity")]
    pub validity: String,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            enabled: true,
            validity: default_rotation_validity(),
        }
    }
}

#[must_use]
pub fn default_true() -> bool {
    true
}

#[must_use]
pub fn default_rotation_validity() -> String {
    "8640h0m0s".to_string()
}
