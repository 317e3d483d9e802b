#![forbid(unsafe_code)]

//! Trust-score computation.
//!
//! The score is a deterministic fold over the latest evidence per
//! (clause, signal) pair: per-category raw credit, weight normalization over
//! the categories that actually reported, a per-category contribution cap,
//! then penalty deductions and ceilings. Same store plus same config yields
//! a bit-identical score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use credence_clause::ClauseSet;

use crate::config::ScoreConfig;
use crate::evidence::{EvidenceStore, SignalCategory};

/// One category's slice of the score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    pub category: SignalCategory,
    /// Mean credit over the clauses this category reported on, in [0, 1].
    pub raw_score: f64,
    /// Normalized weight actually applied.
    pub weight: f64,
    /// Contribution after the single-signal cap, in score points.
    pub capped_contribution: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedPenalty {
    pub tag: String,
    pub deduction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_ceiling: Option<f64>,
    /// Clauses whose disproof triggered the rule.
    pub clauses: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    /// Final score in [0, 100], rounded to two decimal places.
    pub value: f64,
    pub breakdown: Vec<SignalScore>,
    pub penalties: Vec<AppliedPenalty>,
}

/// Round to two decimals. The fold itself runs at full precision; only the
/// reported numbers are rounded, so equal inputs report equal outputs.
fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn compute(store: &EvidenceStore, clauses: &ClauseSet, cfg: &ScoreConfig) -> TrustScore {
    let latest = store.latest();

    // Per-category credit sums over latest evidence only.
    let mut credit: BTreeMap<SignalCategory, (f64, u32)> = BTreeMap::new();
    for ((_, category), ev) in &latest {
        let c = if ev.record.verdict.is_proved() {
            1.0
        } else if ev.record.verdict.is_disproved() {
            0.0
        } else {
            cfg.unknown_partial_credit
        };
        let slot = credit.entry(*category).or_insert((0.0, 0));
        slot.0 += c;
        slot.1 += 1;
    }

    // Weights renormalize over the categories that reported, so a run
    // without e.g. chaos evidence is scored on what did run rather than
    // being dragged down by an absent signal.
    let weight_sum: f64 = credit
        .keys()
        .map(|c| cfg.weights.get(c).copied().unwrap_or(0.0))
        .sum();

    let mut breakdown = Vec::with_capacity(credit.len());
    let mut total = 0.0;
    for (category, (sum, count)) in &credit {
        let raw = sum / f64::from(*count);
        let weight = if weight_sum > 0.0 {
            cfg.weights.get(category).copied().unwrap_or(0.0) / weight_sum
        } else {
            0.0
        };
        let contribution = raw * weight * 100.0;
        let capped = contribution.min(cfg.single_signal_cap * 100.0);
        total += capped;
        breakdown.push(SignalScore {
            category: *category,
            raw_score: raw,
            weight,
            capped_contribution: capped,
        });
    }

    // Penalty rules fire on disproved clauses carrying the rule's tag,
    // once per rule regardless of how many clauses triggered it.
    let mut penalties: Vec<AppliedPenalty> = Vec::new();
    for rule in &cfg.penalties {
        let mut hit: Vec<String> = Vec::new();
        for ((clause_id, _), ev) in &latest {
            if !ev.record.verdict.is_disproved() {
                continue;
            }
            let tagged = clauses
                .get(clause_id)
                .is_some_and(|c| c.meta.tags.contains(&rule.tag));
            if tagged {
                let name = clause_id.to_string();
                if !hit.contains(&name) {
                    hit.push(name);
                }
            }
        }
        if !hit.is_empty() {
            total -= rule.deduction;
            if let Some(ceiling) = rule.score_ceiling {
                total = total.min(ceiling);
            }
            penalties.push(AppliedPenalty {
                tag: rule.tag.clone(),
                deduction: rule.deduction,
                score_ceiling: rule.score_ceiling,
                clauses: hit,
            });
        }
    }

    TrustScore {
        value: round2(total.clamp(0.0, 100.0)),
        breakdown,
        penalties,
    }
}
