//! # Token Secret Payload
//!
//! Builds the token secret from a minted token and reads back what a stored
//! secret says about its token.

use super::{SecretError, SecretRef};
use crate::constants::{
    CA_BUNDLE_KEY, EXPIRATION_ANNOTATION, MANAGED_LABEL, SERVICE_ACCOUNT_ANNOTATION, TOKEN_KEY,
};
use crate::crd::ManagedServiceAccount;
use crate::identity::IdentityRef;
use crate::token::MintedToken;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::Resource;
use std::collections::BTreeMap;

/// What a stored token secret says about its token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSecret {
    pub name: String,
    /// `data.token` is present and non-empty
    pub has_token: bool,
    /// Parsed expiry annotation; `None` when missing or unparsable
    pub expiry: Option<DateTime<Utc>>,
    /// Identity annotation
    pub service_account: Option<String>,
    /// Carries the managed label
    pub managed: bool,
    pub resource_version: Option<String>,
}

impl TokenSecret {
    /// Token present with a readable expiry
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.has_token && self.expiry.is_some()
    }
}

/// Build the desired token secret
///
/// `resource_version` is set when replacing an existing object so the write
/// fails with a conflict if someone else changed it in between.
#[must_use]
pub fn build_token_secret(
    owner: &ManagedServiceAccount,
    secret: &SecretRef,
    token: &MintedToken,
    identity: &IdentityRef,
    ca_bundle: Option<&[u8]>,
    resource_version: Option<String>,
) -> Secret {
    let mut data = BTreeMap::from([(
        TOKEN_KEY.to_string(),
        ByteString(token.token.as_bytes().to_vec()),
    )]);
    if let Some(ca) = ca_bundle {
        data.insert(CA_BUNDLE_KEY.to_string(), ByteString(ca.to_vec()));
    }

    let annotations = BTreeMap::from([
        (
            EXPIRATION_ANNOTATION.to_string(),
            token.expiry.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (SERVICE_ACCOUNT_ANNOTATION.to_string(), identity.username()),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(secret.name.clone()),
            namespace: Some(secret.namespace.clone()),
            labels: Some(BTreeMap::from([(
                MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            annotations: Some(annotations),
            owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
            resource_version,
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Describe a stored token secret
#[must_use]
pub fn parse_token_secret(secret: &Secret) -> TokenSecret {
    let has_token = secret
        .data
        .as_ref()
        .and_then(|d| d.get(TOKEN_KEY))
        .is_some_and(|v| !v.0.is_empty());

    let annotations = secret.metadata.annotations.as_ref();
    let expiry = annotations
        .and_then(|a| a.get(EXPIRATION_ANNOTATION))
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc));
    let service_account = annotations
        .and_then(|a| a.get(SERVICE_ACCOUNT_ANNOTATION))
        .cloned();

    let managed = secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(MANAGED_LABEL))
        .is_some_and(|v| v == "true");

    TokenSecret {
        name: secret.metadata.name.clone().unwrap_or_default(),
        has_token,
        expiry,
        service_account,
        managed,
        resource_version: secret.metadata.resource_version.clone(),
    }
}

/// Refuse to overwrite a secret this controller did not create
pub fn ensure_managed(secret: &SecretRef, current: &Secret) -> Result<(), SecretError> {
    if parse_token_secret(current).managed {
        return Ok(());
    }
    Err(SecretError::Forbidden {
        secret: secret.to_string(),
        message: format!("secret {secret} exists and is not managed (missing label {MANAGED_LABEL})"),
    })
}
