//! Reconciler tests against in-memory hub and managed clusters.

use super::status::{StatusError, StatusReporter};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use super::reconcile;
use crate::config::ControllerConfig;
use crate::constants::{CLEANUP_FINALIZER, EXPIRATION_ANNOTATION, SERVICE_ACCOUNT_ANNOTATION};
use crate::crd::{
    ConditionKind, ManagedServiceAccount, ManagedServiceAccountSpec, ManagedServiceAccountStatus,
    Phase, Rotation,
};
use crate::identity::{IdentityError, IdentityProvisioner, IdentityRef};
use crate::secret::{
    build_token_secret, ensure_managed, parse_token_secret, SecretError, SecretRef, SecretSynchronizer,
    TokenSecret,
};
use crate::runtime::error_policy::next_backoff;
use crate::runtime::watch_loop::detect_trigger_source;
use crate::token::{MintedToken, TokenError, TokenRequester};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube_runtime::controller::Action;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NAMESPACE: &str = "cluster1";

#[derive(Default)]
struct ClusterState {
    identities: HashSet<IdentityRef>,
    identity_not_ready: bool,
    secrets: HashMap<String, Secret>,
    secret_conflicts: u32,
    secret_writes: u32,
    token_errors: HashMap<String, VecDeque<TokenError>>,
    mint_attempts: u32,
    minted: u32,
    statuses: HashMap<String, ManagedServiceAccountStatus>,
    status_writes: Vec<(String, ManagedServiceAccountStatus)>,
    finalizers: HashMap<String, Vec<String>>,
    gone: HashSet<String>,
    events: Vec<String>,
}

/// Hub and managed cluster in one process
#[derive(Clone, Default)]
struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    fn with<R>(&self, f: impl FnOnce(&mut ClusterState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn secret(&self, name: &str) -> Option<Secret> {
        self.with(|s| s.secrets.get(name).cloned())
    }

    fn token_of(&self, name: &str) -> Option<String> {
        self.secret(name).and_then(|secret| {
            secret
                .data
                .and_then(|d| d.get("token").map(|t| String::from_utf8_lossy(&t.0).to_string()))
        })
    }

    fn status(&self, name: &str) -> Option<ManagedServiceAccountStatus> {
        self.with(|s| s.statuses.get(name).cloned())
    }

    fn writes_for(&self, name: &str) -> Vec<ManagedServiceAccountStatus> {
        self.with(|s| {
            s.status_writes
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, status)| status.clone())
                .collect()
        })
    }

    fn fail_next_mint(&self, name: &str, error: TokenError) {
        self.with(|s| {
            s.token_errors
                .entry(name.to_string())
                .or_default()
                .push_back(error);
        });
    }
}

#[async_trait]
impl IdentityProvisioner for FakeCluster {
    async fn ensure_identity(&self, identity: &IdentityRef) -> Result<(), IdentityError> {
        self.with(|s| {
            if s.identity_not_ready {
                return Err(IdentityError::NotReady(identity.to_string()));
            }
            s.identities.insert(identity.clone());
            s.events.push(format!("identity:{}", identity.name));
            Ok(())
        })
    }

    async fn identity_exists(&self, identity: &IdentityRef) -> Result<bool, IdentityError> {
        Ok(self.with(|s| s.identities.contains(identity)))
    }

    async fn remove_identity(&self, identity: &IdentityRef) -> Result<(), IdentityError> {
        self.with(|s| s.identities.remove(identity));
        Ok(())
    }
}

#[async_trait]
impl TokenRequester for FakeCluster {
    async fn request_token(
        &self,
        identity: &IdentityRef,
        validity: Duration,
    ) -> Result<MintedToken, TokenError> {
        self.with(|s| {
            s.mint_attempts += 1;
            if let Some(error) = s
                .token_errors
                .get_mut(&identity.name)
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            if !s.identities.contains(identity) {
                return Err(TokenError::IdentityNotFound(identity.to_string()));
            }
            s.minted += 1;
            s.events.push(format!("mint:{}", identity.name));
            let expiry = Utc::now() + chrono::Duration::from_std(validity).unwrap();
            Ok(MintedToken::new(
                format!("token-{}-{}", identity.name, s.minted),
                expiry,
            ))
        })
    }
}

#[async_trait]
impl SecretSynchronizer for FakeCluster {
    async fn read_token_secret(
        &self,
        secret: &SecretRef,
    ) -> Result<Option<TokenSecret>, SecretError> {
        Ok(self.with(|s| s.secrets.get(&secret.name).map(parse_token_secret)))
    }

    async fn write_secret(
        &self,
        owner: &ManagedServiceAccount,
        secret: &SecretRef,
        token: &MintedToken,
        identity: &IdentityRef,
    ) -> Result<SecretRef, SecretError> {
        self.with(|s| {
            s.secret_writes += 1;
            if s.secret_conflicts > 0 {
                s.secret_conflicts -= 1;
                return Err(SecretError::Conflict(secret.to_string()));
            }
            if let Some(current) = s.secrets.get(&secret.name) {
                ensure_managed(secret, current)?;
            }
            let desired = build_token_secret(owner, secret, token, identity, Some(b"CA"), None);
            s.secrets.insert(secret.name.clone(), desired);
            s.events.push(format!("secret:{}", secret.name));
            Ok(secret.clone())
        })
    }

    async fn delete_secret(&self, secret: &SecretRef) -> Result<(), SecretError> {
        self.with(|s| s.secrets.remove(&secret.name));
        Ok(())
    }
}

#[async_trait]
impl StatusReporter for FakeCluster {
    async fn patch_status(
        &self,
        _namespace: &str,
        name: &str,
        status: &ManagedServiceAccountStatus,
    ) -> Result<(), StatusError> {
        self.with(|s| {
            if s.gone.contains(name) {
                return Err(StatusError::RequestGone(name.to_string()));
            }
            let reported = status.is_condition_true(ConditionKind::TokenReported);
            let created = status.is_condition_true(ConditionKind::SecretCreated);
            s.events.push(format!(
                "status:{name}:created={created}:reported={reported}"
            ));
            s.statuses.insert(name.to_string(), status.clone());
            s.status_writes.push((name.to_string(), status.clone()));
            Ok(())
        })
    }

    async fn is_live(
        &self,
        _namespace: &str,
        name: &str,
        _uid: Option<&str>,
    ) -> Result<bool, StatusError> {
        Ok(self.with(|s| !s.gone.contains(name)))
    }

    async fn set_finalizers(
        &self,
        _namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), StatusError> {
        self.with(|s| s.finalizers.insert(name.to_string(), finalizers));
        Ok(())
    }
}

fn reconciler(cluster: &FakeCluster) -> Arc<Reconciler> {
    let config = ControllerConfig {
        install_namespace: "install".to_string(),
        ..ControllerConfig::default()
    };
    Arc::new(Reconciler::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        config,
    ))
}

fn request(name: &str, rotation: Rotation) -> ManagedServiceAccount {
    let mut msa = ManagedServiceAccount::new(name, ManagedServiceAccountSpec { rotation });
    msa.metadata.namespace = Some(NAMESPACE.to_string());
    msa.metadata.uid = Some(format!("uid-{name}"));
    msa.metadata.generation = Some(1);
    msa
}

fn rotating(validity: &str) -> Rotation {
    Rotation {
        enabled: true,
        validity: validity.to_string(),
    }
}

fn not_rotating() -> Rotation {
    Rotation {
        enabled: false,
        validity: "1h".to_string(),
    }
}

/// Reconcile with the object as the API server would hand it over
async fn reconcile_once(
    cluster: &FakeCluster,
    ctx: &Arc<Reconciler>,
    msa: &mut ManagedServiceAccount,
) -> Result<Action, ReconcilerError> {
    let name = msa.metadata.name.clone().unwrap_or_default();
    msa.status = cluster.status(&name);
    if let Some(finalizers) = cluster.with(|s| s.finalizers.get(&name).cloned()) {
        msa.metadata.finalizers = Some(finalizers);
    }
    reconcile(Arc::new(msa.clone()), ctx.clone(), TriggerSource::Watch).await
}

fn assert_steady(cluster: &FakeCluster, name: &str) {
    let status = cluster.status(name).expect("status written");
    assert_eq!(status.phase, Some(Phase::Steady));
    assert!(status.is_condition_true(ConditionKind::SecretCreated));
    assert!(status.is_condition_true(ConditionKind::TokenReported));
    assert_eq!(status.token_secret_name(), Some(name));
    assert!(cluster.token_of(name).is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_new_request_converges_to_steady() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_ne!(action, Action::await_change());
    assert_steady(&cluster, "e2e");
    let status = cluster.status("e2e").unwrap();
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.expiration_timestamp.is_some());
    assert_eq!(
        cluster.with(|s| s.finalizers.get("e2e").cloned()),
        Some(vec![CLEANUP_FINALIZER.to_string()])
    );
}

#[tokio::test]
async fn test_token_is_bound_to_request_identity() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert!(cluster.with(|s| s.identities.contains(&IdentityRef::new("install", "e2e"))));
    let secret = cluster.secret("e2e").unwrap();
    let annotations = secret.metadata.annotations.unwrap();
    assert_eq!(
        annotations[SERVICE_ACCOUNT_ANNOTATION],
        "system:serviceaccount:install:e2e"
    );
    let owner = &secret.metadata.owner_references.unwrap()[0];
    assert_eq!(owner.name, "e2e");
    assert_eq!(owner.kind, "ManagedServiceAccount");
}

#[tokio::test]
async fn test_token_reported_never_precedes_secret() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    let events = cluster.with(|s| s.events.clone());
    let secret_written = events.iter().position(|e| e == "secret:e2e").unwrap();
    let created = events
        .iter()
        .position(|e| e.contains("created=true"))
        .unwrap();
    let reported = events
        .iter()
        .position(|e| e.contains("reported=true"))
        .unwrap();
    assert!(secret_written < created);
    assert!(created < reported);

    // Two ordered writes: the first one never carries TokenReported=True
    let writes = cluster.writes_for("e2e");
    let first_created = writes
        .iter()
        .find(|w| w.is_condition_true(ConditionKind::SecretCreated))
        .unwrap();
    assert!(!first_created.is_condition_true(ConditionKind::TokenReported));
}

#[tokio::test]
async fn test_repeated_reconcile_is_idempotent() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    let (minted, writes, status_writes) =
        cluster.with(|s| (s.minted, s.secret_writes, s.status_writes.len()));

    for _ in 0..3 {
        let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
        assert_ne!(action, Action::await_change());
    }

    assert_eq!(
        cluster.with(|s| (s.minted, s.secret_writes, s.status_writes.len())),
        (minted, writes, status_writes)
    );
}

#[tokio::test]
async fn test_deleted_secret_is_restored() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    let first_token = cluster.token_of("e2e").unwrap();
    let writes_before = cluster.writes_for("e2e").len();

    cluster.with(|s| s.secrets.remove("e2e"));
    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_steady(&cluster, "e2e");
    assert_ne!(cluster.token_of("e2e").unwrap(), first_token);
    assert_eq!(cluster.with(|s| s.minted), 2);

    // Conditions were withdrawn before the token was reported again
    let writes = cluster.writes_for("e2e");
    let heal_writes = &writes[writes_before..];
    assert!(!heal_writes[0].is_condition_true(ConditionKind::TokenReported));
    assert!(!heal_writes[0].is_condition_true(ConditionKind::SecretCreated));
}

#[tokio::test]
async fn test_deleted_secret_without_rotation_withdraws_conditions() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", not_rotating());

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    assert_steady(&cluster, "e2e");

    cluster.with(|s| s.secrets.remove("e2e"));
    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_eq!(action, Action::await_change());
    let status = cluster.status("e2e").unwrap();
    assert!(!status.is_condition_true(ConditionKind::TokenReported));
    assert!(!status.is_condition_true(ConditionKind::SecretCreated));
    assert_eq!(cluster.with(|s| s.minted), 1);
}

#[tokio::test]
async fn test_emptied_secret_is_reminted() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    cluster.with(|s| {
        if let Some(secret) = s.secrets.get_mut("e2e") {
            secret.data = None;
        }
    });
    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_steady(&cluster, "e2e");
    assert_eq!(cluster.with(|s| s.minted), 2);
}

#[tokio::test]
async fn test_token_inside_rotation_margin_is_rotated() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    // 1h validity rotates 12 minutes before expiry
    let soon = (Utc::now() + chrono::Duration::minutes(5)).to_rfc3339_opts(SecondsFormat::Secs, true);
    cluster.with(|s| {
        if let Some(secret) = s.secrets.get_mut("e2e") {
            secret
                .metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(EXPIRATION_ANNOTATION.to_string(), soon);
        }
    });
    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_eq!(cluster.with(|s| s.minted), 2);
    assert_steady(&cluster, "e2e");
    assert_ne!(action, Action::await_change());
}

#[tokio::test]
async fn test_fatal_error_is_isolated_per_request() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut broken = request("broken", rotating("1h"));
    let mut healthy = request("healthy", rotating("1h"));

    cluster.fail_next_mint(
        "broken",
        TokenError::Unauthorized {
            identity: "install/broken".to_string(),
            message: "forbidden".to_string(),
        },
    );

    let action = reconcile_once(&cluster, &ctx, &mut broken).await.unwrap();
    assert_eq!(action, Action::await_change());
    let status = cluster.status("broken").unwrap();
    assert_eq!(status.phase, Some(Phase::Failed));
    assert_eq!(status.failure_reason.as_deref(), Some("Unauthorized"));
    assert!(cluster.secret("broken").is_none());

    reconcile_once(&cluster, &ctx, &mut healthy).await.unwrap();
    assert_steady(&cluster, "healthy");
    assert_eq!(ctx.error_count("cluster1/healthy"), 0);

    // Failed requests are not retried until their spec changes
    let attempts = cluster.with(|s| s.mint_attempts);
    let action = reconcile_once(&cluster, &ctx, &mut broken).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(cluster.with(|s| s.mint_attempts), attempts);
}

#[tokio::test]
async fn test_spec_update_resets_failed_request() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    cluster.fail_next_mint("e2e", TokenError::IdentityNotFound("install/e2e".to_string()));
    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    assert_eq!(cluster.status("e2e").unwrap().phase, Some(Phase::Failed));

    msa.spec.rotation.validity = "2h".to_string();
    msa.metadata.generation = Some(2);
    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_steady(&cluster, "e2e");
    let status = cluster.status("e2e").unwrap();
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(status.failure_reason, None);
}

#[tokio::test]
async fn test_invalid_validity_fails_without_minting() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1m"));

    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_eq!(action, Action::await_change());
    let status = cluster.status("e2e").unwrap();
    assert_eq!(status.phase, Some(Phase::Failed));
    assert_eq!(status.failure_reason.as_deref(), Some("InvalidValidity"));
    assert_eq!(cluster.with(|s| s.mint_attempts), 0);
}

#[tokio::test]
async fn test_foreign_secret_is_never_overwritten() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    let mut foreign = Secret::default();
    foreign.metadata.name = Some("e2e".to_string());
    foreign.metadata.namespace = Some(NAMESPACE.to_string());
    foreign.data = Some(BTreeMap::from([(
        "password".to_string(),
        ByteString(b"hunter2".to_vec()),
    )]));
    cluster.with(|s| s.secrets.insert("e2e".to_string(), foreign.clone()));

    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_eq!(action, Action::await_change());
    let status = cluster.status("e2e").unwrap();
    assert_eq!(status.phase, Some(Phase::Failed));
    assert_eq!(status.failure_reason.as_deref(), Some("SecretForbidden"));
    assert!(!status.is_condition_true(ConditionKind::SecretCreated));
    assert!(!status.is_condition_true(ConditionKind::TokenReported));
    assert_eq!(cluster.secret("e2e"), Some(foreign));
}

#[tokio::test]
async fn test_identity_is_recreated_before_reminting() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    assert_steady(&cluster, "e2e");

    cluster.with(|s| {
        s.secrets.remove("e2e");
        s.identities.clear();
        s.events.clear();
    });
    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_steady(&cluster, "e2e");
    let events = cluster.with(|s| s.events.clone());
    let identity = events.iter().position(|e| e == "identity:e2e");
    let mint = events.iter().position(|e| e == "mint:e2e");
    assert!(identity.is_some() && mint.is_some());
    assert!(identity < mint, "identity must exist before minting: {events:?}");
    assert_eq!(cluster.with(|s| s.minted), 2);
}

#[tokio::test]
async fn test_oversized_validity_fails_without_minting() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("100000000000h"));

    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_eq!(action, Action::await_change());
    let status = cluster.status("e2e").unwrap();
    assert_eq!(status.phase, Some(Phase::Failed));
    assert_eq!(status.failure_reason.as_deref(), Some("InvalidValidity"));
    assert_eq!(cluster.with(|s| s.mint_attempts), 0);
}

#[tokio::test]
async fn test_transient_mint_error_is_retried() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    cluster.fail_next_mint("e2e", TokenError::Transient("connection reset".to_string()));
    let result = reconcile_once(&cluster, &ctx, &mut msa).await;

    assert!(matches!(result, Err(ReconcilerError::Transient(_))));
    assert_eq!(
        cluster.status("e2e").unwrap().phase,
        Some(Phase::IdentityEnsured)
    );

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    assert_steady(&cluster, "e2e");
}

#[tokio::test]
async fn test_missing_identity_namespace_is_not_a_failure() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    cluster.with(|s| s.identity_not_ready = true);
    let result = reconcile_once(&cluster, &ctx, &mut msa).await;

    assert!(matches!(result, Err(ReconcilerError::NotReady(_))));
    let status = cluster.status("e2e").unwrap();
    assert_eq!(status.phase, Some(Phase::Pending));
    assert_eq!(status.failure_reason, None);
    assert_eq!(cluster.with(|s| s.mint_attempts), 0);
}

#[tokio::test]
async fn test_secret_conflicts_are_retried_immediately() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    cluster.with(|s| s.secret_conflicts = 2);
    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_steady(&cluster, "e2e");
    assert_eq!(cluster.with(|s| s.secret_writes), 3);
    assert_eq!(cluster.with(|s| s.minted), 1);
}

#[tokio::test]
async fn test_secret_conflicts_past_limit_go_to_error_policy() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    cluster.with(|s| s.secret_conflicts = 10);
    let result = reconcile_once(&cluster, &ctx, &mut msa).await;

    assert!(matches!(
        result,
        Err(ReconcilerError::ConflictExhausted { attempts: 3, .. })
    ));
    assert_eq!(cluster.status("e2e").unwrap().phase, Some(Phase::TokenMinted));
    assert!(!cluster
        .status("e2e")
        .unwrap()
        .is_condition_true(ConditionKind::TokenReported));
}

#[tokio::test]
async fn test_request_deleted_mid_flight_is_discarded() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    // First status write succeeds, then the request disappears
    msa.status = Some(ManagedServiceAccountStatus {
        phase: Some(Phase::Pending),
        ..Default::default()
    });
    cluster.with(|s| {
        s.statuses.insert("e2e".to_string(), msa.status.clone().unwrap());
        s.gone.insert("e2e".to_string());
    });
    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert!(cluster.secret("e2e").is_none());
}

#[tokio::test]
async fn test_deletion_cleans_up_derived_objects() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let mut msa = request("e2e", rotating("1h"));

    reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();
    assert!(cluster.secret("e2e").is_some());

    msa.metadata.deletion_timestamp =
        Some(serde_json::from_value(serde_json::json!("2030-01-01T00:00:00Z")).unwrap());
    let action = reconcile_once(&cluster, &ctx, &mut msa).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert!(cluster.secret("e2e").is_none());
    assert!(!cluster.with(|s| s.identities.contains(&IdentityRef::new("install", "e2e"))));
    assert_eq!(
        cluster.with(|s| s.finalizers.get("e2e").cloned()),
        Some(Vec::new())
    );
}

#[test]
fn test_backoff_is_tracked_per_request() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);

    let (first, _) = next_backoff(&ctx, "cluster1/a");
    let (second, count) = next_backoff(&ctx, "cluster1/a");

    assert_eq!(count, 2);
    assert!(first <= Duration::from_millis(1500));
    assert!(second >= Duration::from_secs(1));
    assert_eq!(ctx.error_count("cluster1/b"), 0);

    ctx.reset_backoff("cluster1/a");
    assert_eq!(ctx.error_count("cluster1/a"), 0);
}

#[test]
fn test_trigger_source_classification() {
    let cluster = FakeCluster::default();
    let ctx = reconciler(&cluster);
    let now = Utc::now();
    let mut msa = request("e2e", rotating("1h"));

    assert_eq!(detect_trigger_source(&msa, &ctx, now), TriggerSource::Watch);

    let mut status = ManagedServiceAccountStatus::default();
    status.expiration_timestamp = Some(
        (now + chrono::Duration::minutes(50)).to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    msa.status = Some(status.clone());
    assert_eq!(detect_trigger_source(&msa, &ctx, now), TriggerSource::Watch);

    status.expiration_timestamp = Some(
        (now + chrono::Duration::minutes(5)).to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    msa.status = Some(status);
    assert_eq!(
        detect_trigger_source(&msa, &ctx, now),
        TriggerSource::RotationTimer
    );

    next_backoff(&ctx, "cluster1/e2e");
    assert_eq!(
        detect_trigger_source(&msa, &ctx, now),
        TriggerSource::ErrorBackoff
    );
}
