//! # ServiceAccount Provisioner
//!
//! [`IdentityProvisioner`] backed by the managed cluster's `ServiceAccount` API.

use super::{IdentityError, IdentityProvisioner, IdentityRef};
use crate::client::api_error_code;
use crate::constants::{FIELD_MANAGER, MANAGED_LABEL};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Creates and removes service accounts on the managed cluster
#[derive(Clone)]
pub struct ServiceAccountProvisioner {
    client: Client,
}

impl ServiceAccountProvisioner {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl std::fmt::Debug for ServiceAccountProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountProvisioner")
            .finish_non_exhaustive()
    }
}

/// Desired `ServiceAccount` for an identity
#[must_use]
pub fn desired_service_account(identity: &IdentityRef) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(identity.namespace.clone()),
            labels: Some(BTreeMap::from([(
                MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn classify(identity: &IdentityRef, error: kube::Error) -> IdentityError {
    match api_error_code(&error) {
        // The install namespace is owned by the addon installer; wait for it
        Some(404) => IdentityError::NotReady(identity.to_string()),
        Some(401 | 403) => IdentityError::Forbidden {
            identity: identity.to_string(),
            message: error.to_string(),
        },
        _ => IdentityError::Transient(error.to_string()),
    }
}

#[async_trait]
impl IdentityProvisioner for ServiceAccountProvisioner {
    async fn ensure_identity(&self, identity: &IdentityRef) -> Result<(), IdentityError> {
        let api = self.api(&identity.namespace);

        if api
            .get_opt(&identity.name)
            .await
            .map_err(|e| classify(identity, e))?
            .is_some()
        {
            debug!(identity = %identity, "Service account already present");
            return Ok(());
        }

        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api.create(&params, &desired_service_account(identity)).await {
            Ok(_) => {
                info!(identity = %identity, "Created service account");
            }
            // Created concurrently by someone else
            Err(e) if api_error_code(&e) == Some(409) => {
                debug!(identity = %identity, "Service account created concurrently");
            }
            Err(e) => return Err(classify(identity, e)),
        }

        // Confirm it is readable before tokens are minted against it
        match api.get_opt(&identity.name).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(IdentityError::NotReady(identity.to_string())),
            Err(e) => Err(classify(identity, e)),
        }
    }

    async fn identity_exists(&self, identity: &IdentityRef) -> Result<bool, IdentityError> {
        match self.api(&identity.namespace).get_opt(&identity.name).await {
            Ok(found) => Ok(found.is_some()),
            Err(e) if api_error_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(classify(identity, e)),
        }
    }

    async fn remove_identity(&self, identity: &IdentityRef) -> Result<(), IdentityError> {
        match self
            .api(&identity.namespace)
            .delete(&identity.name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(identity = %identity, "Deleted service account");
                Ok(())
            }
            Err(e) if api_error_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(classify(identity, e)),
        }
    }
}
