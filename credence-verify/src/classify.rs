#![forbid(unsafe_code)]

//! Routing for Unknown results: assign a category and an ordered list of
//! mitigation strategies. This stage never resolves anything itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::eval::EvalTelemetry;
use crate::trivalue::UnknownReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategory {
    Timeout,
    UnsupportedConstruct,
    MissingRuntimeEvidence,
    ResourceExhaustion,
    UndecidableTheory,
}

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnknownCategory::Timeout => "timeout",
            UnknownCategory::UnsupportedConstruct => "unsupported construct",
            UnknownCategory::MissingRuntimeEvidence => "missing runtime evidence",
            UnknownCategory::ResourceExhaustion => "resource exhaustion",
            UnknownCategory::UndecidableTheory => "undecidable theory",
        };
        f.write_str(s)
    }
}

/// One bounded-cost technique the pipeline may attempt, in this fixed
/// priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationStrategy {
    RuntimeSampling,
    FallbackHeuristic,
    ConstraintSlicing,
    SmtRetryRelaxed,
}

impl fmt::Display for MitigationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MitigationStrategy::RuntimeSampling => "runtime sampling",
            MitigationStrategy::FallbackHeuristic => "fallback heuristic",
            MitigationStrategy::ConstraintSlicing => "constraint slicing",
            MitigationStrategy::SmtRetryRelaxed => "smt retry (relaxed bounds)",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub category: UnknownCategory,
    /// Candidate strategies, highest priority first.
    pub strategies: Vec<MitigationStrategy>,
}

/// Pure mapping from an Unknown reason plus execution telemetry to a
/// category and mitigation route.
pub fn classify(reason: &UnknownReason, telemetry: &EvalTelemetry) -> Classification {
    use MitigationStrategy::*;
    match reason {
        UnknownReason::Timeout => Classification {
            category: UnknownCategory::Timeout,
            strategies: vec![SmtRetryRelaxed, FallbackHeuristic],
        },
        UnknownReason::ResourceExhausted | UnknownReason::Complexity(_) => Classification {
            category: UnknownCategory::ResourceExhaustion,
            strategies: vec![SmtRetryRelaxed, FallbackHeuristic],
        },
        UnknownReason::UnsupportedFeature(_) => {
            let category = if telemetry.unbound_vars.is_empty() {
                UnknownCategory::UnsupportedConstruct
            } else {
                UnknownCategory::MissingRuntimeEvidence
            };
            Classification {
                category,
                strategies: vec![RuntimeSampling, ConstraintSlicing],
            }
        }
        UnknownReason::SolverError(_) => Classification {
            category: UnknownCategory::UnsupportedConstruct,
            strategies: vec![RuntimeSampling, FallbackHeuristic, ConstraintSlicing],
        },
        UnknownReason::NonlinearArithmetic
        | UnknownReason::TheoryIncomplete
        | UnknownReason::QuantifierInstantiation => Classification {
            category: UnknownCategory::UndecidableTheory,
            strategies: vec![SmtRetryRelaxed],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_routes_to_relaxed_retry_first() {
        let c = classify(&UnknownReason::Timeout, &EvalTelemetry::default());
        assert_eq!(c.category, UnknownCategory::Timeout);
        assert_eq!(c.strategies[0], MitigationStrategy::SmtRetryRelaxed);
    }

    #[test]
    fn unbound_vars_mean_missing_runtime_evidence() {
        let telemetry = EvalTelemetry {
            unbound_vars: vec!["old_balance".to_string()],
            ..Default::default()
        };
        let c = classify(
            &UnknownReason::UnsupportedFeature("unbound variable `old_balance`".into()),
            &telemetry,
        );
        assert_eq!(c.category, UnknownCategory::MissingRuntimeEvidence);
        assert_eq!(c.strategies[0], MitigationStrategy::RuntimeSampling);
    }

    #[test]
    fn opaque_constructs_without_unbound_vars_are_unsupported() {
        let c = classify(
            &UnknownReason::UnsupportedFeature("opaque call `hash`".into()),
            &EvalTelemetry::default(),
        );
        assert_eq!(c.category, UnknownCategory::UnsupportedConstruct);
    }

    #[test]
    fn theory_obstacles_go_back_to_smt_only() {
        for r in [
            UnknownReason::NonlinearArithmetic,
            UnknownReason::TheoryIncomplete,
            UnknownReason::QuantifierInstantiation,
        ] {
            let c = classify(&r, &EvalTelemetry::default());
            assert_eq!(c.category, UnknownCategory::UndecidableTheory);
            assert_eq!(c.strategies, vec![MitigationStrategy::SmtRetryRelaxed]);
        }
    }
}
