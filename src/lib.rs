//! Managed Service Account Controller Library
//!
//! Provisions a `ServiceAccount` on a managed cluster for every
//! `ManagedServiceAccount` request on the hub, mints a time-bounded token for
//! it, and mirrors the token into a hub secret owned by the request.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use managed_serviceaccount::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod client;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod identity;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod secret;
pub mod token;
