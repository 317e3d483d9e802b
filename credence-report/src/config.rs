#![forbid(unsafe_code)]

//! Run configuration: signal weights, penalty rules, verdict thresholds and
//! resource budgets. Loaded from TOML; every field has a default so a bare
//! `[score]` table is a valid config. Invalid values are a fatal startup
//! error, never a silently substituted default.

use std::collections::BTreeMap;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evidence::SignalCategory;

/// Credit an Unknown verdict contributes relative to a Proved one.
pub const DEFAULT_UNKNOWN_PARTIAL_CREDIT: f64 = 0.4;
/// Hard ceiling on the score contribution of any single signal category,
/// as a fraction of the full 100-point scale.
pub const DEFAULT_SINGLE_SIGNAL_CAP: f64 = 0.5;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    #[diagnostic(code(credence::config::parse))]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    #[diagnostic(code(credence::config::invalid))]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Deduction applied when a clause carrying `tag` is disproved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PenaltyRule {
    pub tag: String,
    pub deduction: f64,
    /// If set, a triggered rule also clamps the final score to this ceiling
    /// and forces a NoShip verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_ceiling: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub ship_min: f64,
    pub warn_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ship_min: 85.0,
            warn_min: 60.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    /// Relative weight per signal category. Normalized at aggregation time
    /// over the categories that actually produced evidence.
    pub weights: BTreeMap<SignalCategory, f64>,
    pub single_signal_cap: f64,
    pub unknown_partial_credit: f64,
    pub penalties: Vec<PenaltyRule>,
    pub thresholds: Thresholds,
    /// A Disproved clause whose latest evidence comes from one of these
    /// categories blocks the release outright.
    pub blocking_categories: Vec<SignalCategory>,
    /// A Disproved clause carrying one of these tags blocks the release.
    pub blocking_tags: Vec<String>,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            weights: SignalCategory::ALL.iter().map(|c| (*c, 1.0)).collect(),
            single_signal_cap: DEFAULT_SINGLE_SIGNAL_CAP,
            unknown_partial_credit: DEFAULT_UNKNOWN_PARTIAL_CREDIT,
            penalties: Vec::new(),
            thresholds: Thresholds::default(),
            blocking_categories: vec![SignalCategory::Smt],
            blocking_tags: vec!["security".to_string()],
        }
    }
}

impl ScoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut any_positive = false;
        for (cat, w) in &self.weights {
            if !w.is_finite() || *w < 0.0 {
                return Err(invalid(
                    "score.weights",
                    format!("weight for `{cat}` must be a finite non-negative number, got {w}"),
                ));
            }
            if *w > 0.0 {
                any_positive = true;
            }
        }
        if !any_positive {
            return Err(invalid("score.weights", "at least one weight must be positive"));
        }
        if !(0.0..1.0).contains(&self.unknown_partial_credit) {
            return Err(invalid(
                "score.unknown_partial_credit",
                format!("must be in [0, 1), got {}", self.unknown_partial_credit),
            ));
        }
        if !(self.single_signal_cap > 0.0 && self.single_signal_cap <= 1.0) {
            return Err(invalid(
                "score.single_signal_cap",
                format!("must be in (0, 1], got {}", self.single_signal_cap),
            ));
        }
        let t = &self.thresholds;
        if !(0.0..=100.0).contains(&t.warn_min)
            || !(0.0..=100.0).contains(&t.ship_min)
            || t.warn_min > t.ship_min
        {
            return Err(invalid(
                "score.thresholds",
                format!(
                    "need 0 <= warn_min <= ship_min <= 100, got warn_min={} ship_min={}",
                    t.warn_min, t.ship_min
                ),
            ));
        }
        for rule in &self.penalties {
            if rule.tag.is_empty() {
                return Err(invalid("score.penalties", "penalty tag must be non-empty"));
            }
            if !(0.0..=100.0).contains(&rule.deduction) {
                return Err(invalid(
                    "score.penalties",
                    format!("deduction for `{}` must be in [0, 100], got {}", rule.tag, rule.deduction),
                ));
            }
            if let Some(c) = rule.score_ceiling {
                if !(0.0..=100.0).contains(&c) {
                    return Err(invalid(
                        "score.penalties",
                        format!("score_ceiling for `{}` must be in [0, 100], got {c}", rule.tag),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The rules whose tag appears in `tags`.
    pub fn penalties_for<'s>(
        &'s self,
        tags: &'s std::collections::BTreeSet<String>,
    ) -> impl Iterator<Item = &'s PenaltyRule> + 's {
        self.penalties.iter().filter(move |p| tags.contains(&p.tag))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Wall-clock deadline for one gate run.
    pub pipeline_timeout_ms: u64,
    /// Per-query solver timeout for the standard SMT attempt.
    pub solver_timeout_ms: u64,
    /// Per-query solver timeout for the relaxed retry stage.
    pub relaxed_solver_timeout_ms: u64,
    /// Total solver invocations allowed across the run.
    pub smt_call_quota: u32,
    pub max_shrink_steps: u32,
    pub workers: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout_ms: 30_000,
            solver_timeout_ms: 500,
            relaxed_solver_timeout_ms: 2_000,
            smt_call_quota: 64,
            max_shrink_steps: 512,
            workers: 4,
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_timeout_ms == 0 {
            return Err(invalid("budget.pipeline_timeout_ms", "must be positive"));
        }
        if self.solver_timeout_ms == 0 || self.relaxed_solver_timeout_ms == 0 {
            return Err(invalid("budget.solver_timeout_ms", "solver timeouts must be positive"));
        }
        if self.relaxed_solver_timeout_ms < self.solver_timeout_ms {
            return Err(invalid(
                "budget.relaxed_solver_timeout_ms",
                "relaxed timeout must not be shorter than the standard timeout",
            ));
        }
        if self.workers == 0 {
            return Err(invalid("budget.workers", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub score: ScoreConfig,
    pub budget: BudgetConfig,
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: RunConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.score.validate()?;
        self.budget.validate()
    }
}
