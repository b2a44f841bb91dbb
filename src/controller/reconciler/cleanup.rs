//! # Cleanup
//!
//! Removes the derived objects of a deleted request before releasing its
//! finalizer: the hub token secret first, then the managed-side identity.

use super::status::StatusError;
use super::types::{Reconciler, ReconcilerError};
use crate::constants::CLEANUP_FINALIZER;
use crate::crd::ManagedServiceAccount;
use crate::identity::IdentityRef;
use crate::secret::SecretRef;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info};

pub async fn cleanup(
    msa: &ManagedServiceAccount,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let resource_key = format!("{namespace}/{name}");

    if !msa.finalizers().iter().any(|f| f == CLEANUP_FINALIZER) {
        debug!("No cleanup finalizer, nothing to do");
        ctx.forget(&resource_key);
        return Ok(Action::await_change());
    }

    info!("Request deleted, cleaning up token secret and identity");

    let secret_name = msa
        .status
        .as_ref()
        .and_then(|s| s.token_secret_name())
        .unwrap_or(name);
    let secret = SecretRef::new(namespace, secret_name);
    if ctx.secrets.secret_exists(&secret).await? {
        ctx.secrets.delete_secret(&secret).await?;
    } else {
        debug!(secret = %secret, "Token secret already gone");
    }

    let identity = IdentityRef::for_request(&ctx.config.install_namespace, name);
    if ctx.identities.identity_exists(&identity).await? {
        ctx.identities.remove_identity(&identity).await?;
    } else {
        debug!(identity = %identity, "Identity already gone");
    }

    let remaining: Vec<String> = msa
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != CLEANUP_FINALIZER)
        .cloned()
        .collect();
    match ctx.status.set_finalizers(namespace, name, remaining).await {
        Ok(()) | Err(StatusError::RequestGone(_)) => {}
        Err(e) => return Err(e.into()),
    }

    ctx.forget(&resource_key);
    info!("Cleanup complete, finalizer removed");
    Ok(Action::await_change())
}
