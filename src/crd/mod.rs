//! # Custom Resource Definitions
//!
//! CRD types for the managed service account controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `ManagedServiceAccount` specification and default values
//! - `status.rs` - Status, phase and condition types

mod spec;
mod status;

pub use spec::{
    default_rotation_validity, default_true, ManagedServiceAccount, ManagedServiceAccountSpec,
    Rotation,
};
pub use status::{
    Condition, ConditionKind, ManagedServiceAccountStatus, Phase, TokenSecretRef,
};
