//! # ManagedServiceAccount Status
//!
//! Status types for tracking provisioning phase and the two contractually
//! stable conditions, `SecretCreated` and `TokenReported`.

use serde::{Deserialize, Serialize};

/// Status of the ManagedServiceAccount resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceAccountStatus {
    /// Provisioning phase of the most recent durable attempt
    #[serde(default)]
    pub phase: Option<Phase>,
    /// Conditions ordered by kind (`SecretCreated` before `TokenReported`)
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Reference to the hub secret holding the current token
    #[serde(default)]
    pub token_secret_ref: Option<TokenSecretRef>,
    /// Expiry of the token currently stored in the secret (RFC3339)
    #[serde(default)]
    pub expiration_timestamp: Option<String>,
    /// Generation the phase and conditions were computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Machine-readable reason while in the `Failed` phase
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Human-readable description of the current phase
    #[serde(default)]
    pub message: Option<String>,
}

impl ManagedServiceAccountStatus {
    /// Look up a condition by kind
    #[must_use]
    pub fn condition(&self, kind: ConditionKind) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Whether the given condition is present and `True`
    #[must_use]
    pub fn is_condition_true(&self, kind: ConditionKind) -> bool {
        self.condition(kind).is_some_and(Condition::is_true)
    }

    /// Name of the token secret recorded by a previous reconciliation
    #[must_use]
    pub fn token_secret_name(&self) -> Option<&str> {
        self.token_secret_ref.as_ref().map(|r| r.name.as_str())
    }
}

/// Provisioning phase
///
/// `Pending → IdentityEnsured → TokenMinted → SecretSynced → Reporting → Steady`,
/// with `Failed` reachable from any step on a fatal error.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, schemars::JsonSchema)]
pub enum Phase {
    Pending,
    IdentityEnsured,
    TokenMinted,
    SecretSynced,
    Reporting,
    Steady,
    Failed,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::IdentityEnsured => "IdentityEnsured",
            Phase::TokenMinted => "TokenMinted",
            Phase::SecretSynced => "SecretSynced",
            Phase::Reporting => "Reporting",
            Phase::Steady => "Steady",
            Phase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of condition kinds the controller reports
#[derive(
    Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, schemars::JsonSchema,
)]
pub enum ConditionKind {
    /// The token secret object exists on the hub
    SecretCreated,
    /// The token secret holds a current, non-empty token
    TokenReported,
}

impl ConditionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::SecretCreated => "SecretCreated",
            ConditionKind::TokenReported => "TokenReported",
        }
    }
}

/// Reference to the hub secret holding the current token
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenSecretRef {
    /// Secret name in the request namespace
    pub name: String,
    /// When the secret payload was last replaced (RFC3339)
    pub last_refresh_timestamp: String,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the status value changed
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
    /// Generation the condition was computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl Condition {
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}
