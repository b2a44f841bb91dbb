//! # Controller
//!
//! Core controller modules for the managed service account controller.
//!
//! - `backoff`: per-request exponential backoff with jitter
//! - `reconciler`: the token provisioning state machine
//! - `server`: metrics and probe HTTP server

pub mod backoff;
pub mod reconciler;
pub mod server;
