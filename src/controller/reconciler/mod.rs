//! # Reconciler
//!
//! Core reconciliation logic for `ManagedServiceAccount` resources.
//!
//! The reconciler:
//! - Ensures the managed-side `ServiceAccount` for each request
//! - Mints a token for it through the TokenRequest API
//! - Mirrors the token into a hub secret owned by the request
//! - Reports `SecretCreated` and `TokenReported` in that order
//! - Rotates the token before it expires and re-mints when the secret is lost
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context, errors, trigger sources, backoff state
//! - `reconcile.rs` - The state machine driving a single request
//! - `rotation.rs` - Pure keep/mint/withdraw planning
//! - `status.rs` - Condition and phase persistence
//! - `validation.rs` - Duration parsing and rotation policy validation
//! - `cleanup.rs` - Finalizer-driven removal of derived objects

mod cleanup;
mod reconcile;
pub mod rotation;
pub mod status;
mod types;
pub mod validation;

#[cfg(test)]
mod tests;

pub use reconcile::reconcile;
pub use status::{KubeStatusStore, StatusError, StatusHandle, StatusReporter};
pub use types::{BackoffState, Reconciler, ReconcilerError, TriggerSource};
