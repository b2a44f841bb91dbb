//! # Runtime
//!
//! Controller runtime: startup wiring, the watch loop, and the error policy
//! that turns reconcile failures into per-request backoff.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
