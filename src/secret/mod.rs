//! # Secret Synchronizer
//!
//! Mirrors minted tokens into the hub-side token secret.
//!
//! ## Module Structure
//!
//! - `payload.rs` - Pure construction and introspection of the secret payload
//! - `hub.rs` - [`SecretSynchronizer`] backed by the hub `Secret` API

mod hub;
mod payload;

pub use hub::HubSecretStore;
pub use payload::{build_token_secret, ensure_managed, parse_token_secret, TokenSecret};

use crate::crd::ManagedServiceAccount;
use crate::identity::IdentityRef;
use crate::token::MintedToken;
use async_trait::async_trait;
use thiserror::Error;

/// Location of a token secret on the hub
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl SecretRef {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Secret synchronization errors
#[derive(Debug, Error)]
pub enum SecretError {
    /// Optimistic-concurrency conflict; re-read and retry
    #[error("conflicting write to secret {0}")]
    Conflict(String),
    #[error("forbidden to write secret {secret}: {message}")]
    Forbidden { secret: String, message: String },
    #[error("transient secret error: {0}")]
    Transient(String),
}

impl SecretError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, SecretError::Conflict(_))
    }
}

/// Hub-side storage of token secrets
#[async_trait]
pub trait SecretSynchronizer: Send + Sync {
    /// Read the secret and describe its payload without exposing the token
    async fn read_token_secret(
        &self,
        secret: &SecretRef,
    ) -> Result<Option<TokenSecret>, SecretError>;

    async fn secret_exists(&self, secret: &SecretRef) -> Result<bool, SecretError> {
        Ok(self.read_token_secret(secret).await?.is_some())
    }

    /// Create the secret, or replace its payload and metadata in one write
    async fn write_secret(
        &self,
        owner: &ManagedServiceAccount,
        secret: &SecretRef,
        token: &MintedToken,
        identity: &IdentityRef,
    ) -> Result<SecretRef, SecretError>;

    /// Delete the secret if this controller manages it
    async fn delete_secret(&self, secret: &SecretRef) -> Result<(), SecretError>;
}
