#![forbid(unsafe_code)]

//! Three-valued truth: Proved, Disproved, or Unknown with a reason.
//!
//! Every operator here treats Unknown as a first-class outcome. Nothing in
//! this module (or anywhere else in the workspace) converts Unknown into a
//! boolean; callers must match on all three cases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a clause could not be decided.
///
/// Assigned once by the stage that produced the Unknown; later stages may
/// replace it with a more specific reason, but each replacement is recorded
/// in the audit trail, never silently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    Timeout,
    /// Expression exceeded a complexity metric (node count, depth, ...).
    Complexity(u32),
    UnsupportedFeature(String),
    QuantifierInstantiation,
    NonlinearArithmetic,
    TheoryIncomplete,
    SolverError(String),
    ResourceExhausted,
}

impl UnknownReason {
    /// Deterministic total order over reason kinds; higher is more specific.
    ///
    /// `combine` keeps the more specific reason so that the final Unknown
    /// explains the sharpest obstacle encountered, not merely the first.
    pub fn specificity(&self) -> u8 {
        match self {
            UnknownReason::Timeout => 0,
            UnknownReason::ResourceExhausted => 1,
            UnknownReason::Complexity(_) => 2,
            UnknownReason::TheoryIncomplete => 3,
            UnknownReason::QuantifierInstantiation => 4,
            UnknownReason::NonlinearArithmetic => 5,
            UnknownReason::UnsupportedFeature(_) => 6,
            UnknownReason::SolverError(_) => 7,
        }
    }

    /// Keep the more specific of two reasons; ties keep the first operand.
    pub fn combine(self, other: UnknownReason) -> UnknownReason {
        if other.specificity() > self.specificity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::Timeout => f.write_str("timeout"),
            UnknownReason::Complexity(m) => write!(f, "complexity limit exceeded (metric {m})"),
            UnknownReason::UnsupportedFeature(what) => write!(f, "unsupported: {what}"),
            UnknownReason::QuantifierInstantiation => {
                f.write_str("quantifier over a symbolic domain")
            }
            UnknownReason::NonlinearArithmetic => f.write_str("nonlinear arithmetic"),
            UnknownReason::TheoryIncomplete => f.write_str("theory incomplete"),
            UnknownReason::SolverError(msg) => write!(f, "solver error: {msg}"),
            UnknownReason::ResourceExhausted => f.write_str("resource budget exhausted"),
        }
    }
}

/// Result of checking one clause or sub-expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriValue {
    Proved,
    Disproved,
    Unknown(UnknownReason),
}

impl TriValue {
    pub fn is_proved(&self) -> bool {
        matches!(self, TriValue::Proved)
    }

    pub fn is_disproved(&self) -> bool {
        matches!(self, TriValue::Disproved)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TriValue::Unknown(_))
    }

    pub fn unknown_reason(&self) -> Option<&UnknownReason> {
        match self {
            TriValue::Unknown(r) => Some(r),
            _ => None,
        }
    }

    pub fn from_bool(b: bool) -> TriValue {
        if b { TriValue::Proved } else { TriValue::Disproved }
    }

    /// Kleene conjunction. Disproved is absorbing.
    pub fn and(self, other: TriValue) -> TriValue {
        match (self, other) {
            (TriValue::Disproved, _) | (_, TriValue::Disproved) => TriValue::Disproved,
            (TriValue::Proved, TriValue::Proved) => TriValue::Proved,
            (TriValue::Proved, TriValue::Unknown(r)) | (TriValue::Unknown(r), TriValue::Proved) => {
                TriValue::Unknown(r)
            }
            (TriValue::Unknown(r1), TriValue::Unknown(r2)) => TriValue::Unknown(r1.combine(r2)),
        }
    }

    /// Kleene disjunction, De Morgan dual of `and`. Proved is absorbing.
    pub fn or(self, other: TriValue) -> TriValue {
        match (self, other) {
            (TriValue::Proved, _) | (_, TriValue::Proved) => TriValue::Proved,
            (TriValue::Disproved, TriValue::Disproved) => TriValue::Disproved,
            (TriValue::Disproved, TriValue::Unknown(r))
            | (TriValue::Unknown(r), TriValue::Disproved) => TriValue::Unknown(r),
            (TriValue::Unknown(r1), TriValue::Unknown(r2)) => TriValue::Unknown(r1.combine(r2)),
        }
    }

    /// Swaps Proved/Disproved; Unknown passes through, reason preserved.
    pub fn not(self) -> TriValue {
        match self {
            TriValue::Proved => TriValue::Disproved,
            TriValue::Disproved => TriValue::Proved,
            TriValue::Unknown(r) => TriValue::Unknown(r),
        }
    }

    pub fn implies(self, other: TriValue) -> TriValue {
        self.not().or(other)
    }

    /// `ALL` over a finite domain: and-fold, identity Proved.
    pub fn all(values: impl IntoIterator<Item = TriValue>) -> TriValue {
        values
            .into_iter()
            .fold(TriValue::Proved, |acc, v| acc.and(v))
    }

    /// `ANY` over a finite domain: or-fold, identity Disproved.
    pub fn any(values: impl IntoIterator<Item = TriValue>) -> TriValue {
        values
            .into_iter()
            .fold(TriValue::Disproved, |acc, v| acc.or(v))
    }

    /// `NONE` over a finite domain: NOT(ANY).
    pub fn none(values: impl IntoIterator<Item = TriValue>) -> TriValue {
        TriValue::any(values).not()
    }
}

impl fmt::Display for TriValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriValue::Proved => f.write_str("proved"),
            TriValue::Disproved => f.write_str("disproved"),
            TriValue::Unknown(r) => write!(f, "unknown ({r})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(r: UnknownReason) -> TriValue {
        TriValue::Unknown(r)
    }

    #[test]
    fn and_disproved_is_absorbing() {
        for v in [
            TriValue::Proved,
            TriValue::Disproved,
            u(UnknownReason::Timeout),
        ] {
            assert_eq!(v.clone().and(TriValue::Disproved), TriValue::Disproved);
            assert_eq!(TriValue::Disproved.and(v), TriValue::Disproved);
        }
    }

    #[test]
    fn or_proved_is_absorbing() {
        for v in [
            TriValue::Proved,
            TriValue::Disproved,
            u(UnknownReason::NonlinearArithmetic),
        ] {
            assert_eq!(v.clone().or(TriValue::Proved), TriValue::Proved);
            assert_eq!(TriValue::Proved.or(v), TriValue::Proved);
        }
    }

    #[test]
    fn or_proved_beats_disproved() {
        assert_eq!(TriValue::Proved.or(TriValue::Disproved), TriValue::Proved);
        assert_eq!(TriValue::Disproved.or(TriValue::Proved), TriValue::Proved);
    }

    #[test]
    fn and_proved_propagates_unknown() {
        assert_eq!(
            TriValue::Proved.and(u(UnknownReason::Timeout)),
            u(UnknownReason::Timeout)
        );
    }

    #[test]
    fn not_is_involutive_and_preserves_reason() {
        let v = u(UnknownReason::SolverError("segfault".into()));
        assert_eq!(v.clone().not(), v.clone());
        assert_eq!(TriValue::Proved.not().not(), TriValue::Proved);
        assert_eq!(TriValue::Disproved.not(), TriValue::Proved);
    }

    #[test]
    fn combine_keeps_more_specific_reason() {
        let combined = UnknownReason::Timeout.combine(UnknownReason::NonlinearArithmetic);
        assert_eq!(combined, UnknownReason::NonlinearArithmetic);
        // Ties keep the first-encountered operand.
        let a = UnknownReason::UnsupportedFeature("a".into());
        let b = UnknownReason::UnsupportedFeature("b".into());
        assert_eq!(a.clone().combine(b), a);
    }

    #[test]
    fn implies_matches_or_not_definition() {
        let vals = [
            TriValue::Proved,
            TriValue::Disproved,
            u(UnknownReason::TheoryIncomplete),
        ];
        for a in &vals {
            for b in &vals {
                assert_eq!(
                    a.clone().implies(b.clone()),
                    a.clone().not().or(b.clone())
                );
            }
        }
    }

    #[test]
    fn quantifier_folds_over_empty_domains() {
        assert_eq!(TriValue::all([]), TriValue::Proved);
        assert_eq!(TriValue::any([]), TriValue::Disproved);
        assert_eq!(TriValue::none([]), TriValue::Proved);
    }
}
