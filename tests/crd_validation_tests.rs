//! # CRD Validation Tests
//!
//! Tests for the `ManagedServiceAccount` CRD to catch schema drift early.
//! These validate that sample resources deserialize and that the generated
//! CRD keeps its group, version, scope, and status subresource.

use kube::core::CustomResourceExt;
use managed_serviceaccount::crd::{ConditionKind, ManagedServiceAccount, Phase};

/// Request with every spec field set
#[test]
fn test_request_with_rotation() {
    let yaml = r#"
apiVersion: authentication.open-cluster-management.io/v1alpha1
kind: ManagedServiceAccount
metadata:
  name: my-workload
  namespace: cluster1
spec:
  rotation:
    enabled: true
    validity: 720h0m0s
"#;

    let msa: ManagedServiceAccount =
        serde_yaml::from_str(yaml).expect("Should deserialize request with rotation");

    assert_eq!(msa.metadata.name.as_deref(), Some("my-workload"));
    assert_eq!(msa.metadata.namespace.as_deref(), Some("cluster1"));
    assert!(msa.spec.rotation.enabled);
    assert_eq!(msa.spec.rotation.validity, "720h0m0s");
    assert!(msa.status.is_none());
}

/// Omitted rotation block falls back to defaults
#[test]
fn test_request_with_empty_spec() {
    let yaml = r#"
apiVersion: authentication.open-cluster-management.io/v1alpha1
kind: ManagedServiceAccount
metadata:
  name: defaults
  namespace: cluster1
spec: {}
"#;

    let msa: ManagedServiceAccount =
        serde_yaml::from_str(yaml).expect("Should deserialize request with empty spec");

    assert!(msa.spec.rotation.enabled);
    assert_eq!(msa.spec.rotation.validity, "8640h0m0s");
}

/// Rotation disabled keeps the validity as written
#[test]
fn test_request_with_rotation_disabled() {
    let yaml = r#"
apiVersion: authentication.open-cluster-management.io/v1alpha1
kind: ManagedServiceAccount
metadata:
  name: fixed
  namespace: cluster1
spec:
  rotation:
    enabled: false
"#;

    let msa: ManagedServiceAccount =
        serde_yaml::from_str(yaml).expect("Should deserialize request with rotation disabled");

    assert!(!msa.spec.rotation.enabled);
    assert_eq!(msa.spec.rotation.validity, "8640h0m0s");
}

/// Status as written by the controller reads back
#[test]
fn test_request_with_steady_status() {
    let yaml = r#"
apiVersion: authentication.open-cluster-management.io/v1alpha1
kind: ManagedServiceAccount
metadata:
  name: my-workload
  namespace: cluster1
  generation: 2
spec:
  rotation:
    enabled: true
    validity: 24h
status:
  phase: Steady
  observedGeneration: 2
  expirationTimestamp: "2030-01-01T00:00:00Z"
  tokenSecretRef:
    name: my-workload
    lastRefreshTimestamp: "2029-12-31T00:00:00Z"
  conditions:
    - type: SecretCreated
      status: "True"
      reason: TokenSecretSynced
      lastTransitionTime: "2029-12-31T00:00:00Z"
    - type: TokenReported
      status: "True"
      reason: TokenReported
      lastTransitionTime: "2029-12-31T00:00:00Z"
"#;

    let msa: ManagedServiceAccount =
        serde_yaml::from_str(yaml).expect("Should deserialize request with status");
    let status = msa.status.expect("status present");

    assert_eq!(status.phase, Some(Phase::Steady));
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(status.token_secret_name(), Some("my-workload"));
    assert!(status.is_condition_true(ConditionKind::SecretCreated));
    assert!(status.is_condition_true(ConditionKind::TokenReported));
}

/// Unknown phases are rejected rather than silently dropped
#[test]
fn test_unknown_phase_is_rejected() {
    let yaml = r#"
apiVersion: authentication.open-cluster-management.io/v1alpha1
kind: ManagedServiceAccount
metadata:
  name: broken
  namespace: cluster1
spec: {}
status:
  phase: Exploded
"#;

    let result: Result<ManagedServiceAccount, _> = serde_yaml::from_str(yaml);
    assert!(result.is_err(), "Unknown phase should not deserialize");
}

#[test]
fn test_generated_crd_identity() {
    let crd = ManagedServiceAccount::crd();

    assert_eq!(
        crd.metadata.name.as_deref(),
        Some("managedserviceaccounts.authentication.open-cluster-management.io")
    );
    assert_eq!(crd.spec.group, "authentication.open-cluster-management.io");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.kind, "ManagedServiceAccount");
    assert_eq!(
        crd.spec.names.short_names.as_deref(),
        Some(&["msa".to_string()][..])
    );
}

#[test]
fn test_generated_crd_has_status_subresource() {
    let crd = ManagedServiceAccount::crd();

    assert_eq!(crd.spec.versions.len(), 1);
    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version.served);
    assert!(version.storage);
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());
    let columns = version.additional_printer_columns.as_ref().expect("printer columns");
    assert!(columns.iter().any(|c| c.name == "TokenReported"));
}

#[test]
fn test_generated_crd_serializes_to_yaml() {
    let yaml = serde_yaml::to_string(&ManagedServiceAccount::crd()).expect("CRD serializes");
    assert!(yaml.contains("kind: CustomResourceDefinition"));
    assert!(yaml.contains("rotation"));
    assert!(yaml.contains("tokenSecretRef"));
}
