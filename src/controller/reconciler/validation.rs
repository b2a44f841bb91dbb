//! # Validation
//!
//! Parses Go-style duration strings and validates the rotation policy of a
//! request before anything is minted.

use crate::constants::{MAX_TOKEN_VALIDITY_SECS, MIN_TOKEN_VALIDITY_SECS};
use crate::crd::Rotation;
use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_FORMAT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:\d+(?:\.\d+)?(?:ms|s|m|h|d))+$").ok());

static DURATION_COMPONENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+(?:\.\d+)?)(?P<unit>ms|s|m|h|d)").ok()
});

/// Parse a Go/metav1 duration string into a `Duration`
///
/// Supports single and compound forms: "30m", "1h30m", "720h0m0s", "1.5h", "2d".
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let trimmed = duration_str.trim();

    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let (Some(format), Some(component)) = (DURATION_FORMAT.as_ref(), DURATION_COMPONENT.as_ref())
    else {
        return Err(anyhow::anyhow!("Failed to compile duration regex"));
    };

    let lower = trimmed.to_lowercase();
    if !format.is_match(&lower) {
        return Err(anyhow::anyhow!(
            "Invalid duration format '{}'. Expected e.g. '30m', '1h30m' or '720h0m0s'",
            trimmed
        ));
    }

    let mut total_secs = 0f64;
    for captures in component.captures_iter(&lower) {
        let (Some(number), Some(unit)) = (captures.name("number"), captures.name("unit")) else {
            return Err(anyhow::anyhow!("Failed to parse duration '{}'", trimmed));
        };
        let number: f64 = number.as_str().parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid duration number '{}' in '{}': {}",
                number.as_str(),
                trimmed,
                e
            )
        })?;
        let unit_secs = match unit.as_str() {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "d" => 86400.0,
            other => {
                return Err(anyhow::anyhow!(
                    "Invalid unit '{}' in duration '{}'",
                    other,
                    trimmed
                ));
            }
        };
        total_secs += number * unit_secs;
    }

    Duration::try_from_secs_f64(total_secs)
        .map_err(|e| anyhow::anyhow!("Duration '{}' is out of range: {}", trimmed, e))
}

/// Validate a token validity against the TokenRequest bounds
pub fn validate_validity(validity: &str, field_name: &str) -> Result<Duration> {
    let duration = parse_duration(validity)
        .map_err(|e| anyhow::anyhow!("{field_name} is invalid: {e}"))?;

    if duration.as_secs() < MIN_TOKEN_VALIDITY_SECS {
        return Err(anyhow::anyhow!(
            "{field_name} '{}' must be at least {} seconds (got {} seconds)",
            validity.trim(),
            MIN_TOKEN_VALIDITY_SECS,
            duration.as_secs()
        ));
    }

    if duration.as_secs() > MAX_TOKEN_VALIDITY_SECS {
        return Err(anyhow::anyhow!(
            "{field_name} '{}' must be at most {} seconds (got {} seconds)",
            validity.trim(),
            MAX_TOKEN_VALIDITY_SECS,
            duration.as_secs()
        ));
    }

    Ok(duration)
}

/// Validity a mint should request for this rotation policy
///
/// With rotation enabled the request's own validity applies; otherwise the
/// controller-wide default is used and the request's value is ignored.
pub fn effective_validity(rotation: &Rotation, default_validity: &str) -> Result<Duration> {
    if rotation.enabled {
        validate_validity(&rotation.validity, "spec.rotation.validity")
    } else {
        validate_validity(default_validity, "DEFAULT_TOKEN_VALIDITY")
    }
}
