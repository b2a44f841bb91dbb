//! # Hub Secret Store
//!
//! [`SecretSynchronizer`] backed by the hub cluster's `Secret` API.

use super::payload::{build_token_secret, ensure_managed, parse_token_secret, TokenSecret};
use super::{SecretError, SecretRef, SecretSynchronizer};
use crate::client::api_error_code;
use crate::constants::FIELD_MANAGER;
use crate::crd::ManagedServiceAccount;
use crate::identity::IdentityRef;
use crate::observability;
use crate::token::MintedToken;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

/// Writes token secrets on the hub cluster
#[derive(Clone)]
pub struct HubSecretStore {
    client: Client,
    /// Managed cluster CA bundle (PEM) copied into every secret
    ca_bundle: Option<Vec<u8>>,
}

impl HubSecretStore {
    #[must_use]
    pub fn new(client: Client, ca_bundle: Option<Vec<u8>>) -> Self {
        Self { client, ca_bundle }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for HubSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSecretStore")
            .field("has_ca_bundle", &self.ca_bundle.is_some())
            .finish_non_exhaustive()
    }
}

fn classify(secret: &SecretRef, error: kube::Error, replacing: bool) -> SecretError {
    match api_error_code(&error) {
        Some(409) => SecretError::Conflict(secret.to_string()),
        // Deleted between our read and the replace
        Some(404) if replacing => SecretError::Conflict(secret.to_string()),
        Some(401 | 403) => SecretError::Forbidden {
            secret: secret.to_string(),
            message: error.to_string(),
        },
        _ => SecretError::Transient(error.to_string()),
    }
}

#[async_trait]
impl SecretSynchronizer for HubSecretStore {
    async fn read_token_secret(
        &self,
        secret: &SecretRef,
    ) -> Result<Option<TokenSecret>, SecretError> {
        let found = self
            .api(&secret.namespace)
            .get_opt(&secret.name)
            .await
            .map_err(|e| classify(secret, e, false))?;
        Ok(found.as_ref().map(parse_token_secret))
    }

    async fn write_secret(
        &self,
        owner: &ManagedServiceAccount,
        secret: &SecretRef,
        token: &MintedToken,
        identity: &IdentityRef,
    ) -> Result<SecretRef, SecretError> {
        let api = self.api(&secret.namespace);
        let existing = api
            .get_opt(&secret.name)
            .await
            .map_err(|e| classify(secret, e, false))?;

        match existing {
            None => {
                let desired =
                    build_token_secret(owner, secret, token, identity, self.ca_bundle.as_deref(), None);
                api.create(&Self::post_params(), &desired)
                    .await
                    .map_err(|e| classify(secret, e, false))?;
                observability::metrics::increment_secret_writes("create");
                info!(secret = %secret, "Created token secret");
            }
            Some(current) => {
                ensure_managed(secret, &current)?;
                let desired = build_token_secret(
                    owner,
                    secret,
                    token,
                    identity,
                    self.ca_bundle.as_deref(),
                    current.metadata.resource_version.clone(),
                );
                api.replace(&secret.name, &Self::post_params(), &desired)
                    .await
                    .map_err(|e| classify(secret, e, true))?;
                observability::metrics::increment_secret_writes("replace");
                info!(secret = %secret, "Replaced token secret");
            }
        }

        Ok(secret.clone())
    }

    async fn delete_secret(&self, secret: &SecretRef) -> Result<(), SecretError> {
        let Some(current) = self.read_token_secret(secret).await? else {
            debug!(secret = %secret, "Token secret already gone");
            return Ok(());
        };
        if !current.managed {
            warn!(secret = %secret, "Leaving unmanaged secret in place");
            return Ok(());
        }

        match self
            .api(&secret.namespace)
            .delete(&secret.name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(secret = %secret, "Deleted token secret");
                Ok(())
            }
            Err(e) if api_error_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(classify(secret, e, false)),
        }
    }
}
