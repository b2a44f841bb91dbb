//! # TokenRequest Client
//!
//! [`TokenRequester`] backed by the `serviceaccounts/token` subresource of the
//! managed cluster.

use super::{MintedToken, TokenError, TokenRequester};
use crate::client::api_error_code;
use crate::identity::IdentityRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Mints tokens through the managed cluster's TokenRequest API
#[derive(Clone)]
pub struct ManagedTokenRequester {
    client: Client,
}

impl ManagedTokenRequester {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for ManagedTokenRequester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTokenRequester")
            .finish_non_exhaustive()
    }
}

/// Build the TokenRequest body for a validity window
#[must_use]
pub fn token_request_for(validity: Duration) -> TokenRequest {
    TokenRequest {
        spec: TokenRequestSpec {
            expiration_seconds: Some(i64::try_from(validity.as_secs()).unwrap_or(i64::MAX)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Extract the token and its expiry from a TokenRequest response
///
/// The expiry is the one the server reports. A reported expiry that is not
/// in the future is replaced by `now + validity`.
pub fn minted_token_from_response(
    response: TokenRequest,
    validity: Duration,
    now: DateTime<Utc>,
) -> Result<MintedToken, TokenError> {
    let status = response
        .status
        .ok_or_else(|| TokenError::Transient("token request returned no status".to_string()))?;

    if status.token.is_empty() {
        return Err(TokenError::Transient(
            "token request returned an empty token".to_string(),
        ));
    }

    let reported = status.expiration_timestamp.0;
    let expiry = if reported > now {
        reported
    } else {
        warn!(
            reported = %reported,
            validity_secs = validity.as_secs(),
            "Token request reported an expiry in the past, assuming the requested validity"
        );
        chrono::Duration::from_std(validity)
            .ok()
            .and_then(|v| now.checked_add_signed(v))
            .unwrap_or(reported)
    };

    Ok(MintedToken::new(status.token, expiry))
}

fn classify(identity: &IdentityRef, error: kube::Error) -> TokenError {
    match api_error_code(&error) {
        Some(404) => TokenError::IdentityNotFound(identity.to_string()),
        Some(401 | 403) => TokenError::Unauthorized {
            identity: identity.to_string(),
            message: error.to_string(),
        },
        _ => TokenError::Transient(error.to_string()),
    }
}

#[async_trait]
impl TokenRequester for ManagedTokenRequester {
    async fn request_token(
        &self,
        identity: &IdentityRef,
        validity: Duration,
    ) -> Result<MintedToken, TokenError> {
        if validity.is_zero() {
            return Err(TokenError::InvalidRequest(
                "validity must be positive".to_string(),
            ));
        }

        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &identity.namespace);
        debug!(
            identity = %identity,
            validity_secs = validity.as_secs(),
            "Requesting token"
        );

        let response = api
            .create_token_request(
                &identity.name,
                &PostParams::default(),
                &token_request_for(validity),
            )
            .await
            .map_err(|e| {
                let error = classify(identity, e);
                warn!(identity = %identity, reason = error.reason(), "Token request failed: {}", error);
                error
            })?;

        minted_token_from_response(response, validity, Utc::now())
    }
}
