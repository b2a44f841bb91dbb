//! # Reconcile
//!
//! Drives one `ManagedServiceAccount` through
//! `Pending → IdentityEnsured → TokenMinted → SecretSynced → Reporting → Steady`.
//!
//! A reconcile either finishes with an [`Action`] or hands a retryable
//! [`ReconcilerError`] to the error policy. Fatal errors are persisted as the
//! `Failed` phase and wait for a spec change. A request deleted mid-flight
//! ends the reconcile quietly.

use super::cleanup::cleanup;
use super::rotation::{plan, refresh_at, MintReason, PlanInput, TokenPlan, WithdrawReason};
use super::status::{StatusError, StatusHandle};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use super::validation::effective_validity;
use crate::constants::CLEANUP_FINALIZER;
use crate::crd::{ManagedServiceAccount, Phase};
use crate::identity::{IdentityError, IdentityRef};
use crate::observability;
use crate::secret::{SecretError, SecretRef};
use crate::token::TokenError;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Shortest requeue ever scheduled, so a token that is already due does not spin
const MIN_REQUEUE: Duration = Duration::from_secs(1);

/// Why a reconcile stopped before reaching `Steady`
enum Halt {
    /// The request was deleted while we worked on it
    Gone,
    /// Persist `Failed` and wait for a spec change
    Fatal {
        reason: &'static str,
        message: String,
    },
    /// Record how far we got and let the error policy retry
    Retry {
        reached: Option<Phase>,
        error: ReconcilerError,
    },
}

impl From<StatusError> for Halt {
    fn from(error: StatusError) -> Self {
        match error {
            StatusError::RequestGone(_) => Halt::Gone,
            other => Halt::Retry {
                reached: None,
                error: other.into(),
            },
        }
    }
}

/// Reconcile a single request
pub async fn reconcile(
    msa: Arc<ManagedServiceAccount>,
    ctx: Arc<Reconciler>,
    trigger_source: TriggerSource,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    observability::metrics::increment_reconciliations();

    let name = msa.name_any();
    let Some(namespace) = msa.namespace() else {
        return Err(ReconcilerError::InvalidResource(format!(
            "ManagedServiceAccount {name} has no namespace"
        )));
    };

    let span = tracing::info_span!(
        "reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.generation = msa.metadata.generation.unwrap_or(0),
        trigger = trigger_source.as_str(),
    );

    let result = reconcile_request(&msa, &ctx, &namespace, &name)
        .instrument(span)
        .await;

    observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result
}

async fn reconcile_request(
    msa: &ManagedServiceAccount,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let resource_key = format!("{namespace}/{name}");

    if msa.metadata.deletion_timestamp.is_some() {
        return cleanup(msa, ctx, namespace, name).await;
    }

    if !msa.finalizers().iter().any(|f| f == CLEANUP_FINALIZER) {
        let mut finalizers = msa.finalizers().to_vec();
        finalizers.push(CLEANUP_FINALIZER.to_string());
        match ctx.status.set_finalizers(namespace, name, finalizers).await {
            Ok(()) => debug!("Added cleanup finalizer"),
            Err(StatusError::RequestGone(_)) => return Ok(Action::await_change()),
            Err(e) => return Err(e.into()),
        }
    }

    let mut status = StatusHandle::new(ctx.status.as_ref(), msa);
    let spec_changed = status
        .current()
        .observed_generation
        .is_some_and(|observed| Some(observed) != msa.metadata.generation);

    if status.current().phase == Some(Phase::Failed) {
        if !spec_changed {
            debug!("Request failed and spec is unchanged, waiting for an update");
            ctx.set_failed(&resource_key, true);
            return Ok(Action::await_change());
        }
        info!("Spec changed since failure, retrying");
        ctx.set_failed(&resource_key, false);
    }

    let outcome = drive(msa, ctx, &mut status, namespace, name, spec_changed).await;
    match outcome {
        Ok(action) => {
            ctx.set_failed(&resource_key, false);
            ctx.reset_backoff(&resource_key);
            Ok(action)
        }
        Err(Halt::Gone) => {
            debug!("Request is gone, discarding result");
            Ok(Action::await_change())
        }
        Err(Halt::Fatal { reason, message }) => {
            warn!(reason, "Request failed: {}", message);
            match status.record_failure(reason, &message).await {
                Ok(()) | Err(StatusError::RequestGone(_)) => {}
                Err(e) => return Err(e.into()),
            }
            ctx.set_failed(&resource_key, true);
            Ok(Action::await_change())
        }
        Err(Halt::Retry { reached, error }) => {
            if let Some(phase) = reached {
                if let Err(e) = status.record_progress(phase, &error.to_string()).await {
                    debug!("Could not record progress: {}", e);
                }
            }
            Err(error)
        }
    }
}

async fn drive(
    msa: &ManagedServiceAccount,
    ctx: &Reconciler,
    status: &mut StatusHandle<'_>,
    namespace: &str,
    name: &str,
    spec_changed: bool,
) -> Result<Action, Halt> {
    status.record_pending().await?;

    let rotation = &msa.spec.rotation;
    let validity = effective_validity(rotation, &ctx.config.default_token_validity).map_err(
        |e| Halt::Fatal {
            reason: "InvalidValidity",
            message: e.to_string(),
        },
    )?;

    let identity = IdentityRef::for_request(&ctx.config.install_namespace, name);
    let secret_ref = SecretRef::new(
        namespace,
        status.current().token_secret_name().unwrap_or(name),
    );

    let stored = ctx
        .secrets
        .read_token_secret(&secret_ref)
        .await
        .map_err(|e| secret_halt(e, None))?;

    let username = identity.username();
    let token_plan = plan(&PlanInput {
        secret: stored.as_ref(),
        username: &username,
        rotation_enabled: rotation.enabled,
        validity,
        previously_reported: status.current().token_secret_ref.is_some(),
        spec_changed,
        now: Utc::now(),
    });
    debug!(plan = ?token_plan, "Planned token action");

    match token_plan {
        TokenPlan::Keep { expiry, refresh_at } => {
            status.confirm_steady(&secret_ref, expiry).await?;
            Ok(requeue_at(refresh_at.unwrap_or(expiry)))
        }
        TokenPlan::Withdraw(reason) => {
            let message = match reason {
                WithdrawReason::TokenExpired => "Token expired and rotation is disabled",
                WithdrawReason::SecretMissing | WithdrawReason::SecretStale => {
                    "Token secret is unusable and rotation is disabled"
                }
            };
            info!(reason = reason.as_str(), "Withdrawing reported token");
            status.withdraw(reason.as_str(), message).await?;
            Ok(Action::await_change())
        }
        TokenPlan::Mint(reason) => {
            if reason.is_self_heal() {
                info!(reason = reason.as_str(), "Token secret lost, re-minting");
                observability::metrics::increment_self_heal();
                status
                    .withdraw(
                        "SecretMissing",
                        &format!("Token secret {} is being restored", secret_ref.name),
                    )
                    .await?;
            }
            mint_and_publish(msa, ctx, status, &identity, &secret_ref, validity, reason).await
        }
    }
}

async fn mint_and_publish(
    msa: &ManagedServiceAccount,
    ctx: &Reconciler,
    status: &mut StatusHandle<'_>,
    identity: &IdentityRef,
    secret_ref: &SecretRef,
    validity: Duration,
    reason: MintReason,
) -> Result<Action, Halt> {
    // Pending -> IdentityEnsured
    ctx.identities
        .ensure_identity(identity)
        .await
        .map_err(|e| match e {
            IdentityError::Forbidden { message, .. } => Halt::Fatal {
                reason: "IdentityForbidden",
                message,
            },
            other => Halt::Retry {
                reached: Some(Phase::Pending),
                error: other.into(),
            },
        })?;
    debug!(identity = %identity, "Identity ensured");

    // IdentityEnsured -> TokenMinted
    let token = match ctx.tokens.request_token(identity, validity).await {
        Ok(token) => {
            observability::metrics::increment_tokens_minted();
            token
        }
        Err(e) => {
            observability::metrics::increment_token_mint_errors(e.reason());
            return Err(match e {
                TokenError::Transient(_) => Halt::Retry {
                    reached: Some(Phase::IdentityEnsured),
                    error: e.into(),
                },
                fatal => Halt::Fatal {
                    reason: fatal.reason(),
                    message: fatal.to_string(),
                },
            });
        }
    };
    info!(
        identity = %identity,
        reason = reason.as_str(),
        expiry = %token.expiry,
        "Minted token"
    );

    // Do not publish a token for a request that went away while minting
    let live = ctx
        .status
        .is_live(
            secret_ref.namespace.as_str(),
            msa.name_any().as_str(),
            msa.metadata.uid.as_deref(),
        )
        .await?;
    if !live {
        return Err(Halt::Gone);
    }

    // TokenMinted -> SecretSynced
    let limit = ctx.config.conflict_retry_limit.max(1);
    let mut attempts = 0;
    let written = loop {
        attempts += 1;
        match ctx
            .secrets
            .write_secret(msa, secret_ref, &token, identity)
            .await
        {
            Ok(written) => break written,
            Err(e) if e.is_conflict() && attempts < limit => {
                debug!(attempt = attempts, "Secret write conflicted, retrying");
            }
            Err(SecretError::Conflict(secret)) => {
                return Err(Halt::Retry {
                    reached: Some(Phase::TokenMinted),
                    error: ReconcilerError::ConflictExhausted { secret, attempts },
                });
            }
            Err(e) => return Err(secret_halt(e, Some(Phase::TokenMinted))),
        }
    };

    // SecretSynced -> Reporting -> Steady, as two ordered writes
    status.record_secret_synced(&written, token.expiry).await?;
    status.record_token_reported().await?;

    if msa.spec.rotation.enabled {
        Ok(requeue_at(refresh_at(token.expiry, validity)))
    } else {
        Ok(requeue_at(token.expiry))
    }
}

fn secret_halt(error: SecretError, reached: Option<Phase>) -> Halt {
    match error {
        SecretError::Forbidden { message, .. } => Halt::Fatal {
            reason: "SecretForbidden",
            message,
        },
        other => Halt::Retry {
            reached,
            error: other.into(),
        },
    }
}

/// Requeue at `when`, or shortly if it already passed
fn requeue_at(when: DateTime<Utc>) -> Action {
    let delay = (when - Utc::now()).to_std().unwrap_or(MIN_REQUEUE).max(MIN_REQUEUE);
    observability::metrics::increment_requeues_total("rotation");
    debug!(
        next_reconcile = %when.to_rfc3339(),
        delay_secs = delay.as_secs(),
        "Scheduled next token check"
    );
    Action::requeue(delay)
}
