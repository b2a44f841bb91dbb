//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `managed_serviceaccount_reconciliations_total` - Total number of reconciliations
//! - `managed_serviceaccount_reconciliation_errors_total` - Total number of reconciliation errors
//! - `managed_serviceaccount_reconciliation_duration_seconds` - Duration of reconciliations
//! - `managed_serviceaccount_tokens_minted_total` - Tokens minted through the TokenRequest API
//! - `managed_serviceaccount_token_mint_errors_total` - Failed mints by reason
//! - `managed_serviceaccount_secret_writes_total` - Token secret writes by operation
//! - `managed_serviceaccount_self_heal_total` - Re-mints caused by a missing or stale secret
//! - `managed_serviceaccount_requeues_total` - Requeues by reason
//! - `managed_serviceaccount_failed_requests` - Requests currently in the `Failed` phase

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_serviceaccount_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_serviceaccount_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "managed_serviceaccount_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static TOKENS_MINTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_serviceaccount_tokens_minted_total",
        "Total number of tokens minted through the TokenRequest API",
    )
    .expect("Failed to create TOKENS_MINTED_TOTAL metric - this should never happen")
});

static TOKEN_MINT_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "managed_serviceaccount_token_mint_errors_total",
            "Total number of failed token mints by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create TOKEN_MINT_ERRORS_TOTAL metric - this should never happen")
});

static SECRET_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "managed_serviceaccount_secret_writes_total",
            "Total number of token secret writes by operation (create, replace)",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRET_WRITES_TOTAL metric - this should never happen")
});

static SELF_HEAL_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_serviceaccount_self_heal_total",
        "Total number of re-mints caused by a missing or stale token secret",
    )
    .expect("Failed to create SELF_HEAL_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "managed_serviceaccount_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static FAILED_REQUESTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "managed_serviceaccount_failed_requests",
        "Current number of requests in the Failed phase",
    )
    .expect("Failed to create FAILED_REQUESTS metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(TOKENS_MINTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKEN_MINT_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SELF_HEAL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FAILED_REQUESTS.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_tokens_minted() {
    TOKENS_MINTED_TOTAL.inc();
}

pub fn increment_token_mint_errors(reason: &str) {
    TOKEN_MINT_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_secret_writes(operation: &str) {
    SECRET_WRITES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_self_heal() {
    SELF_HEAL_TOTAL.inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_failed_requests(count: i64) {
    FAILED_REQUESTS.set(count);
}
