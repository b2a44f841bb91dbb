//! # Status Reporting
//!
//! Computes and persists phase and conditions on `ManagedServiceAccount`.
//!
//! [`StatusHandle`] keeps the last written status of one request and only
//! talks to the API when a write would change something. A
//! [`StatusReporter`] performs the writes; [`KubeStatusStore`] is the hub
//! implementation.

use crate::client::api_error_code;
use crate::constants::FIELD_MANAGER;
use crate::crd::{
    Condition, ConditionKind, ManagedServiceAccount, ManagedServiceAccountStatus, Phase,
    TokenSecretRef,
};
use crate::secret::SecretRef;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use thiserror::Error;
use tracing::debug;

/// Status write errors
#[derive(Debug, Error)]
pub enum StatusError {
    /// The request was deleted; the write is moot
    #[error("request {0} is gone")]
    RequestGone(String),
    #[error("forbidden to update {resource}: {message}")]
    Forbidden { resource: String, message: String },
    #[error("transient status error: {0}")]
    Transient(String),
}

/// Writes to the request object itself
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Replace the whole status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManagedServiceAccountStatus,
    ) -> Result<(), StatusError>;

    /// Whether the request with this uid still exists and is not being deleted
    async fn is_live(&self, namespace: &str, name: &str, uid: Option<&str>)
        -> Result<bool, StatusError>;

    /// Replace the finalizer list of the request
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), StatusError>;
}

/// Hub implementation of [`StatusReporter`]
#[derive(Clone)]
pub struct KubeStatusStore {
    client: Client,
}

impl KubeStatusStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ManagedServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl std::fmt::Debug for KubeStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusStore").finish_non_exhaustive()
    }
}

fn classify(namespace: &str, name: &str, error: kube::Error) -> StatusError {
    let resource = format!("{namespace}/{name}");
    match api_error_code(&error) {
        Some(404) => StatusError::RequestGone(resource),
        Some(401 | 403) => StatusError::Forbidden {
            resource,
            message: error.to_string(),
        },
        _ => StatusError::Transient(error.to_string()),
    }
}

#[async_trait]
impl StatusReporter for KubeStatusStore {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ManagedServiceAccountStatus,
    ) -> Result<(), StatusError> {
        let patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(namespace, name, e))?;
        Ok(())
    }

    async fn is_live(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
    ) -> Result<bool, StatusError> {
        let current = self
            .api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(namespace, name, e))?;
        Ok(current.is_some_and(|msa| {
            msa.metadata.deletion_timestamp.is_none()
                && (uid.is_none() || msa.metadata.uid.as_deref() == uid)
        }))
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), StatusError> {
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(namespace, name, e))?;
        Ok(())
    }
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Insert or update a condition, keeping conditions ordered by kind
///
/// `lastTransitionTime` only moves when the condition's status value changes.
/// Returns whether anything changed.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    kind: ConditionKind,
    observed: bool,
    reason: &str,
    message: &str,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    let status = if observed { "True" } else { "False" };

    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == kind) {
        let mut updated = existing.clone();
        if updated.status != status {
            updated.status = status.to_string();
            updated.last_transition_time = Some(timestamp(now));
        }
        updated.reason = Some(reason.to_string());
        updated.message = Some(message.to_string());
        updated.observed_generation = generation;

        if *existing == updated {
            return false;
        }
        *existing = updated;
        return true;
    }

    conditions.push(Condition {
        kind,
        status: status.to_string(),
        last_transition_time: Some(timestamp(now)),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        observed_generation: generation,
    });
    conditions.sort_by_key(|c| c.kind);
    true
}

/// Status of one request as last written, plus the means to change it
pub struct StatusHandle<'a> {
    reporter: &'a dyn StatusReporter,
    namespace: String,
    name: String,
    generation: Option<i64>,
    current: ManagedServiceAccountStatus,
}

impl std::fmt::Debug for StatusHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHandle")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<'a> StatusHandle<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn StatusReporter, msa: &ManagedServiceAccount) -> Self {
        Self {
            reporter,
            namespace: msa.metadata.namespace.clone().unwrap_or_default(),
            name: msa.metadata.name.clone().unwrap_or_default(),
            generation: msa.metadata.generation,
            current: msa.status.clone().unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn current(&self) -> &ManagedServiceAccountStatus {
        &self.current
    }

    /// Write `desired` unless it equals what is already recorded
    async fn commit(&mut self, desired: ManagedServiceAccountStatus) -> Result<(), StatusError> {
        if desired == self.current {
            debug!(
                resource.name = self.name.as_str(),
                "Status unchanged, skipping write"
            );
            return Ok(());
        }
        self.reporter
            .patch_status(&self.namespace, &self.name, &desired)
            .await?;
        self.current = desired;
        Ok(())
    }

    /// Record the first observation of a request
    pub async fn record_pending(&mut self) -> Result<(), StatusError> {
        if self.current.phase.is_some() {
            return Ok(());
        }
        let mut desired = self.current.clone();
        desired.phase = Some(Phase::Pending);
        desired.message = Some("Waiting for the managed identity".to_string());
        self.commit(desired).await
    }

    /// Record the last step a reconcile completed before it stopped
    pub async fn record_progress(&mut self, phase: Phase, message: &str) -> Result<(), StatusError> {
        let mut desired = self.current.clone();
        desired.phase = Some(phase);
        desired.message = Some(message.to_string());
        self.commit(desired).await
    }

    /// Set a single condition
    pub async fn set_condition(
        &mut self,
        kind: ConditionKind,
        observed: bool,
        reason: &str,
        message: &str,
    ) -> Result<(), StatusError> {
        self.set_condition_with(kind, observed, reason, message, |_, _| {})
            .await
    }

    /// Set a single condition and let `update` adjust the rest of the status
    /// in the same write
    pub async fn set_condition_with(
        &mut self,
        kind: ConditionKind,
        observed: bool,
        reason: &str,
        message: &str,
        update: impl FnOnce(&mut ManagedServiceAccountStatus, DateTime<Utc>) + Send,
    ) -> Result<(), StatusError> {
        let now = Utc::now();
        let mut desired = self.current.clone();
        upsert_condition(
            &mut desired.conditions,
            kind,
            observed,
            reason,
            message,
            self.generation,
            now,
        );
        update(&mut desired, now);
        self.commit(desired).await
    }

    /// First of the two ordered writes after a secret write
    pub async fn record_secret_synced(
        &mut self,
        secret: &SecretRef,
        expiry: DateTime<Utc>,
    ) -> Result<(), StatusError> {
        self.set_condition_with(
            ConditionKind::SecretCreated,
            true,
            "SecretCreated",
            &format!("Token secret {} is present", secret.name),
            |desired, now| {
                desired.phase = Some(Phase::SecretSynced);
                desired.token_secret_ref = Some(TokenSecretRef {
                    name: secret.name.clone(),
                    last_refresh_timestamp: timestamp(now),
                });
                desired.expiration_timestamp = Some(timestamp(expiry));
                desired.failure_reason = None;
                desired.message = Some("Token secret written".to_string());
            },
        )
        .await
    }

    /// Second of the two ordered writes: the token is now visible
    pub async fn record_token_reported(&mut self) -> Result<(), StatusError> {
        let generation = self.generation;
        self.set_condition_with(
            ConditionKind::TokenReported,
            true,
            "TokenReported",
            "Token is reported in the token secret",
            |desired, _| {
                desired.phase = Some(Phase::Steady);
                desired.observed_generation = generation;
                desired.failure_reason = None;
                desired.message = Some("Token reported".to_string());
            },
        )
        .await
    }

    /// Reconcile conditions of a kept token with the stored secret
    ///
    /// Repairs a status that lags behind a secret already written, e.g. when
    /// the controller restarted between the two ordered writes.
    pub async fn confirm_steady(
        &mut self,
        secret: &SecretRef,
        expiry: DateTime<Utc>,
    ) -> Result<(), StatusError> {
        let status = &self.current;
        let expiry_str = timestamp(expiry);
        let consistent = status.phase == Some(Phase::Steady)
            && status.is_condition_true(ConditionKind::SecretCreated)
            && status.is_condition_true(ConditionKind::TokenReported)
            && status.token_secret_name() == Some(secret.name.as_str())
            && status.expiration_timestamp.as_deref() == Some(expiry_str.as_str());
        if consistent {
            return Ok(());
        }

        let mut desired = self.current.clone();
        if !desired.is_condition_true(ConditionKind::SecretCreated) {
            upsert_condition(
                &mut desired.conditions,
                ConditionKind::SecretCreated,
                true,
                "SecretCreated",
                &format!("Token secret {} is present", secret.name),
                self.generation,
                Utc::now(),
            );
        }
        if desired.token_secret_name() != Some(secret.name.as_str()) {
            desired.token_secret_ref = Some(TokenSecretRef {
                name: secret.name.clone(),
                last_refresh_timestamp: timestamp(Utc::now()),
            });
        }
        desired.expiration_timestamp = Some(expiry_str);
        self.commit(desired).await?;
        self.record_token_reported().await
    }

    /// Withdraw both conditions in one write
    pub async fn withdraw(&mut self, reason: &str, message: &str) -> Result<(), StatusError> {
        let now = Utc::now();
        let mut desired = self.current.clone();
        upsert_condition(
            &mut desired.conditions,
            ConditionKind::TokenReported,
            false,
            reason,
            message,
            self.generation,
            now,
        );
        upsert_condition(
            &mut desired.conditions,
            ConditionKind::SecretCreated,
            false,
            reason,
            message,
            self.generation,
            now,
        );
        desired.phase = Some(Phase::Pending);
        desired.expiration_timestamp = None;
        desired.message = Some(message.to_string());
        self.commit(desired).await
    }

    /// Persist a fatal error; the request waits for a spec update
    pub async fn record_failure(&mut self, reason: &str, message: &str) -> Result<(), StatusError> {
        let mut desired = self.current.clone();
        desired.phase = Some(Phase::Failed);
        desired.failure_reason = Some(reason.to_string());
        desired.message = Some(message.to_string());
        desired.observed_generation = self.generation;
        self.commit(desired).await
    }
}
