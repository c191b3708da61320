//! Expiry evaluation
//!
//! One algorithm for every kind; the descriptor supplies the readiness
//! predicate and the age anchor.

use chrono::{DateTime, Duration, Utc};

use crate::target::CleanupTarget;
use crate::ttl::{TtlError, TtlPolicy};

/// Result of evaluating one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Marked as preserved, never swept
    Preserved,
    /// Readiness predicate does not hold yet
    NotReady,
    /// TTL override label is malformed or zero
    InvalidTtl { raw: String, error: TtlError },
    /// The anchor timestamp is absent
    MissingAnchor,
    /// Within its TTL
    Keep { age: Duration, ttl: Duration },
    /// Outlived its TTL
    Expired { age: Duration, ttl: Duration },
}

impl Evaluation {
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, Evaluation::Expired { .. })
    }

    /// Age used for the decision, when one was computed
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        match self {
            Evaluation::Keep { age, .. } | Evaluation::Expired { age, .. } => Some(*age),
            _ => None,
        }
    }

    /// Whether the target passed the readiness gate and takes part in the
    /// deleted/kept accounting.
    #[must_use]
    pub fn is_counted(&self) -> bool {
        !matches!(self, Evaluation::Preserved | Evaluation::NotReady)
    }
}

/// Decide whether `target` should be deleted at `now`.
#[must_use]
pub fn evaluate(target: &CleanupTarget, policy: &TtlPolicy, now: DateTime<Utc>) -> Evaluation {
    let descriptor = target.kind.descriptor();

    if target.is_preserved() {
        return Evaluation::Preserved;
    }

    if !descriptor.is_ready(&target.status) {
        return Evaluation::NotReady;
    }

    let ttl = match policy.resolve(&target.labels) {
        Ok(ttl) => ttl,
        Err(error) => {
            return Evaluation::InvalidTtl {
                raw: target
                    .labels
                    .get(crate::ttl::LABEL_TTL)
                    .cloned()
                    .unwrap_or_default(),
                error,
            }
        }
    };

    let Some(anchor) = descriptor.anchor.resolve(target) else {
        return Evaluation::MissingAnchor;
    };

    let age = now - anchor;
    if age > ttl {
        Evaluation::Expired { age, ttl }
    } else {
        Evaluation::Keep { age, ttl }
    }
}
