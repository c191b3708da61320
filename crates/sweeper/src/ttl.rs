//! TTL parsing and resolution
//!
//! Durations use a compact grammar of `<integer><unit>` segments that may be
//! concatenated (`"7d"`, `"2h"`, `"1h30m"`). A bare integer is read as seconds.

use std::collections::BTreeMap;

use chrono::Duration;
use thiserror::Error;

/// Label that carries a per-object TTL override
pub const LABEL_TTL: &str = "ttl";

/// Default TTL applied when an object carries no override
pub const DEFAULT_TTL: &str = "7d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TtlError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration '{input}': {reason}")]
    Invalid { input: String, reason: String },

    #[error("duration '{0}' is out of range")]
    Overflow(String),

    #[error("TTL '{0}' must be greater than zero")]
    Zero(String),
}

impl TtlError {
    fn invalid(input: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

fn unit_seconds(unit: &str) -> Option<i64> {
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600),
        "d" | "day" | "days" => Some(86_400),
        "w" | "wk" | "wks" | "week" | "weeks" => Some(604_800),
        _ => None,
    }
}

/// Parse a duration string like "5d", "2h" or "1h30m".
pub fn parse_duration(text: &str) -> Result<Duration, TtlError> {
    let input = text.trim().to_ascii_lowercase();
    if input.is_empty() {
        return Err(TtlError::Empty);
    }

    // A bare integer is seconds, but only as the whole input
    if input.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = input
            .parse()
            .map_err(|_| TtlError::Overflow(text.to_string()))?;
        return Duration::try_seconds(secs).ok_or_else(|| TtlError::Overflow(text.to_string()));
    }

    let mut total: i64 = 0;
    let mut rest = input.as_str();

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(TtlError::invalid(text, "expected a number"));
        }
        let (digits, tail) = rest.split_at(digits_end);

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);

        let value: i64 = digits
            .parse()
            .map_err(|_| TtlError::Overflow(text.to_string()))?;
        let unit = unit.trim();
        if unit.is_empty() {
            return Err(TtlError::invalid(text, format!("missing unit after '{digits}'")));
        }
        let factor = unit_seconds(unit)
            .ok_or_else(|| TtlError::invalid(text, format!("unknown unit '{unit}'")))?;

        total = value
            .checked_mul(factor)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| TtlError::Overflow(text.to_string()))?;
        rest = tail;
    }

    Duration::try_seconds(total).ok_or_else(|| TtlError::Overflow(text.to_string()))
}

/// TTL policy shared by a cleanup pass: the process-wide default plus
/// per-object overrides read from labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    default_ttl: Duration,
}

impl TtlPolicy {
    /// Build the policy from the configured default. Zero or unparsable
    /// defaults are rejected.
    pub fn from_default(text: &str) -> Result<Self, TtlError> {
        let default_ttl = parse_ttl(text)?;
        Ok(Self { default_ttl })
    }

    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Resolve the TTL for an object. A present but malformed override is an
    /// error; the default is only used when no override label exists.
    pub fn resolve(&self, labels: &BTreeMap<String, String>) -> Result<Duration, TtlError> {
        match labels.get(LABEL_TTL) {
            Some(raw) => parse_ttl(raw),
            None => Ok(self.default_ttl),
        }
    }
}

fn parse_ttl(text: &str) -> Result<Duration, TtlError> {
    let ttl = parse_duration(text)?;
    if ttl <= Duration::zero() {
        return Err(TtlError::Zero(text.to_string()));
    }
    Ok(ttl)
}

/// Render a duration the way it is written in labels, e.g. `3d4h`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.num_seconds();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    if secs < 0 {
        out.push('-');
        secs = -secs;
    }
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        let count = secs / size;
        if count > 0 {
            out.push_str(&format!("{count}{unit}"));
            secs %= size;
        }
    }
    out
}
