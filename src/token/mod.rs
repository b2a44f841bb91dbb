//! # Token Requester
//!
//! Mints bound, time-limited tokens for a managed-side identity.
//!
//! Every call mints a fresh token. Nothing is cached and nothing is retried
//! here: the reconciler decides what a failure means for the request.

mod token_request;

pub use token_request::ManagedTokenRequester;

use crate::identity::IdentityRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A freshly minted bearer token
///
/// Held in memory only between minting and the secret write; the token bytes
/// are wiped when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MintedToken {
    pub token: String,
    #[zeroize(skip)]
    pub expiry: DateTime<Utc>,
}

impl MintedToken {
    #[must_use]
    pub fn new(token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expiry,
        }
    }
}

impl std::fmt::Debug for MintedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintedToken")
            .field("token", &"***")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Token minting errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// The identity does not exist on the managed cluster
    #[error("identity {0} not found")]
    IdentityNotFound(String),
    /// The controller is not allowed to mint tokens for the identity
    #[error("unauthorized to mint token for {identity}: {message}")]
    Unauthorized { identity: String, message: String },
    #[error("transient token request error: {0}")]
    Transient(String),
    /// The request itself was malformed (non-positive validity)
    #[error("invalid token request: {0}")]
    InvalidRequest(String),
}

impl TokenError {
    /// Short label used for metrics and status reasons
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::IdentityNotFound(_) => "IdentityNotFound",
            TokenError::Unauthorized { .. } => "Unauthorized",
            TokenError::Transient(_) => "Transient",
            TokenError::InvalidRequest(_) => "InvalidRequest",
        }
    }
}

#[async_trait]
pub trait TokenRequester: Send + Sync {
    /// Mint a token for `identity` valid for `validity`
    async fn request_token(
        &self,
        identity: &IdentityRef,
        validity: Duration,
    ) -> Result<MintedToken, TokenError>;
}
