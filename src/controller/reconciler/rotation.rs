//! # Rotation Planning
//!
//! Decides, from the observed token secret and the request's rotation policy,
//! whether the current token is kept, a new one is minted, or the reported
//! token is withdrawn.
//!
//! Planning is pure: all inputs are passed in, including the clock.

use crate::constants::ROTATION_MARGIN_DIVISOR;
use crate::secret::TokenSecret;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Why a new token is minted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MintReason {
    /// Nothing has been reported for this request yet
    Initial,
    /// The spec changed since the token was last reported
    SpecChanged,
    /// The current token is within its rotation margin
    RotationDue,
    /// The token secret disappeared
    SecretMissing,
    /// The token secret is empty, has no readable expiry, or names another identity
    SecretStale,
}

impl MintReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MintReason::Initial => "initial",
            MintReason::SpecChanged => "spec-changed",
            MintReason::RotationDue => "rotation-due",
            MintReason::SecretMissing => "secret-missing",
            MintReason::SecretStale => "secret-stale",
        }
    }

    /// Re-mint caused by interference with derived state
    #[must_use]
    pub fn is_self_heal(&self) -> bool {
        matches!(self, MintReason::SecretMissing | MintReason::SecretStale)
    }
}

/// Why the reported token is withdrawn without re-minting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawReason {
    SecretMissing,
    SecretStale,
    TokenExpired,
}

impl WithdrawReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawReason::SecretMissing => "SecretMissing",
            WithdrawReason::SecretStale => "SecretStale",
            WithdrawReason::TokenExpired => "TokenExpired",
        }
    }
}

/// Outcome of rotation planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlan {
    /// The stored token is current; check again at `refresh_at` if set
    Keep {
        expiry: DateTime<Utc>,
        refresh_at: Option<DateTime<Utc>>,
    },
    Mint(MintReason),
    Withdraw(WithdrawReason),
}

/// Inputs to [`plan`]
#[derive(Debug, Clone)]
pub struct PlanInput<'a> {
    /// The token secret as currently stored, if any
    pub secret: Option<&'a TokenSecret>,
    /// Username the stored token must authenticate as
    pub username: &'a str,
    pub rotation_enabled: bool,
    /// Validity the next mint would request
    pub validity: Duration,
    /// A token has been reported for this request before
    pub previously_reported: bool,
    /// The spec generation differs from the last reported one
    pub spec_changed: bool,
    pub now: DateTime<Utc>,
}

/// Time before expiry at which a token is rotated
#[must_use]
pub fn rotation_margin(validity: Duration) -> Duration {
    validity / ROTATION_MARGIN_DIVISOR
}

/// Instant at which a token expiring at `expiry` is due for rotation
///
/// Saturates at the earliest representable instant, so an out-of-range
/// margin makes the token due immediately.
#[must_use]
pub fn refresh_at(expiry: DateTime<Utc>, validity: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(rotation_margin(validity))
        .ok()
        .and_then(|margin| expiry.checked_sub_signed(margin))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Decide what to do with the token of one request
#[must_use]
pub fn plan(input: &PlanInput<'_>) -> TokenPlan {
    let Some(secret) = input.secret else {
        return if !input.previously_reported {
            TokenPlan::Mint(MintReason::Initial)
        } else if input.spec_changed {
            TokenPlan::Mint(MintReason::SpecChanged)
        } else if input.rotation_enabled {
            TokenPlan::Mint(MintReason::SecretMissing)
        } else {
            TokenPlan::Withdraw(WithdrawReason::SecretMissing)
        };
    };

    if input.spec_changed {
        return TokenPlan::Mint(MintReason::SpecChanged);
    }

    let bound_to_identity = secret.service_account.as_deref() == Some(input.username);
    let expiry = match (secret.has_token && bound_to_identity, secret.expiry) {
        (true, Some(expiry)) => expiry,
        _ if input.rotation_enabled || !input.previously_reported => {
            return TokenPlan::Mint(MintReason::SecretStale);
        }
        _ => return TokenPlan::Withdraw(WithdrawReason::SecretStale),
    };

    if input.rotation_enabled {
        let due = refresh_at(expiry, input.validity);
        if input.now >= due {
            TokenPlan::Mint(MintReason::RotationDue)
        } else {
            TokenPlan::Keep {
                expiry,
                refresh_at: Some(due),
            }
        }
    } else if input.now >= expiry {
        TokenPlan::Withdraw(WithdrawReason::TokenExpired)
    } else {
        TokenPlan::Keep {
            expiry,
            refresh_at: None,
        }
    }
}
