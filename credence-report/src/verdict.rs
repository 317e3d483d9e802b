#![forbid(unsafe_code)]

//! Verdict aggregation: fold the evidence store and trust score into a
//! Ship / Warn / NoShip decision.
//!
//! Blocking disproofs dominate: a single disproved clause in a blocking
//! category, or carrying a blocking tag, forces NoShip no matter how high
//! the numeric score lands.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use credence_clause::{ClauseId, ClauseSet};

use crate::config::ScoreConfig;
use crate::evidence::{EvidenceStore, SignalCategory};
use crate::score::{self, TrustScore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Ship,
    Warn,
    NoShip,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Decision::Ship => "ship",
            Decision::Warn => "warn",
            Decision::NoShip => "no-ship",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub score: TrustScore,
    /// Clauses whose disproof forced a NoShip.
    pub blockers: Vec<ClauseId>,
    /// Human-readable notes: one per blocker, one per unresolved clause,
    /// plus an evidence trail summary.
    pub recommendations: Vec<String>,
}

pub fn aggregate(store: &EvidenceStore, clauses: &ClauseSet, cfg: &ScoreConfig) -> Verdict {
    let score = score::compute(store, clauses, cfg);
    let latest = store.latest();

    let mut blockers: Vec<ClauseId> = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();

    for ((clause_id, category), ev) in &latest {
        if !ev.record.verdict.is_disproved() {
            continue;
        }
        let blocking_category = cfg.blocking_categories.contains(category);
        let blocking_tag = clauses.get(clause_id).is_some_and(|c| {
            cfg.blocking_tags.iter().any(|t| c.meta.tags.contains(t))
        });
        if !(blocking_category || blocking_tag) {
            continue;
        }
        if !blockers.contains(clause_id) {
            blockers.push(clause_id.clone());
        }
        let mut note = format!(
            "{clause_id} disproved by {category} ({}, confidence {})",
            ev.record.source, ev.record.confidence
        );
        if let Some(cx) = &ev.record.counterexample {
            let _ = write!(note, "; counterexample: {}", cx.summary());
        }
        recommendations.push(note);
    }

    // A triggered ceiling penalty is a release blocker in its own right.
    let ceiling_hit = score.penalties.iter().any(|p| p.score_ceiling.is_some());
    for p in &score.penalties {
        if p.score_ceiling.is_some() {
            recommendations.push(format!(
                "penalty `{}` capped the score at {:.0} (triggered by {})",
                p.tag,
                p.score_ceiling.unwrap_or(0.0),
                p.clauses.join(", ")
            ));
        }
    }

    // Unresolved clauses surface in the report even though they do not
    // block on their own.
    for id in store.known_clauses() {
        let unresolved = SignalCategory::ALL.iter().any(|cat| {
            latest
                .get(&(id.clone(), *cat))
                .is_some_and(|ev| ev.record.verdict.is_unknown())
        });
        if unresolved {
            recommendations.push(format!("{id} has unresolved evidence; gather more signals"));
        }
    }

    let decision = if !blockers.is_empty() || ceiling_hit {
        Decision::NoShip
    } else if score.value >= cfg.thresholds.ship_min {
        Decision::Ship
    } else if score.value >= cfg.thresholds.warn_min {
        Decision::Warn
    } else {
        Decision::NoShip
    };

    Verdict {
        decision,
        score,
        blockers,
        recommendations,
    }
}

impl Verdict {
    /// Plain-text report for terminal output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "verdict: {}", self.decision);
        let _ = writeln!(out, "trust score: {:.2}", self.score.value);
        if !self.score.breakdown.is_empty() {
            let _ = writeln!(out, "signals:");
            for s in &self.score.breakdown {
                let _ = writeln!(
                    out,
                    "  {:<10} raw {:.2}  weight {:.2}  contributes {:.2}",
                    s.category.to_string(),
                    s.raw_score,
                    s.weight,
                    s.capped_contribution
                );
            }
        }
        for p in &self.score.penalties {
            let _ = writeln!(out, "penalty -{:.0} ({}): {}", p.deduction, p.tag, p.clauses.join(", "));
        }
        if !self.blockers.is_empty() {
            let _ = writeln!(out, "blockers:");
            for b in &self.blockers {
                let _ = writeln!(out, "  {b}");
            }
        }
        for r in &self.recommendations {
            let _ = writeln!(out, "note: {r}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{Confidence, EvidenceRecord};
    use credence_clause::build::*;
    use credence_clause::{BinOp, Clause, ClauseKind};
    use credence_verify::TriValue;

    fn fixture(tags: &[&str]) -> (ClauseSet, EvidenceStore) {
        let mut c = Clause::new(
            ClauseId::new("ledger.spec:12", ClauseKind::Invariant),
            bin(var("balance"), BinOp::Ge, int(0)),
        );
        c.meta.tags = tags.iter().map(|t| t.to_string()).collect();
        let clauses: ClauseSet = [c].into_iter().collect();
        let store = EvidenceStore::for_clauses(&clauses);
        (clauses, store)
    }

    fn submit(store: &mut EvidenceStore, cat: SignalCategory, verdict: TriValue) {
        store
            .submit(EvidenceRecord {
                clause_id: ClauseId::new("ledger.spec:12", ClauseKind::Invariant),
                category: cat,
                verdict,
                counterexample: None,
                confidence: Confidence::Medium,
                source: cat.to_string(),
                timestamp_ms: 0,
            })
            .unwrap();
    }

    #[test]
    fn high_score_ships() {
        let (clauses, mut store) = fixture(&[]);
        for cat in SignalCategory::ALL {
            submit(&mut store, cat, TriValue::Proved);
        }
        let v = aggregate(&store, &clauses, &ScoreConfig::default());
        assert_eq!(v.decision, Decision::Ship);
        assert!(v.blockers.is_empty());
    }

    #[test]
    fn blocking_tag_disproof_forces_no_ship_at_any_score() {
        let (clauses, mut store) = fixture(&["security"]);
        for cat in [SignalCategory::Static, SignalCategory::Smt, SignalCategory::Evaluator] {
            submit(&mut store, cat, TriValue::Proved);
        }
        // A pbt disproof on a security-tagged clause blocks even though pbt
        // is not a blocking category by default.
        submit(&mut store, SignalCategory::Pbt, TriValue::Disproved);
        let v = aggregate(&store, &clauses, &ScoreConfig::default());
        assert_eq!(v.decision, Decision::NoShip);
        assert_eq!(
            v.blockers,
            vec![ClauseId::new("ledger.spec:12", ClauseKind::Invariant)]
        );
    }

    #[test]
    fn blocking_category_disproof_forces_no_ship() {
        let (clauses, mut store) = fixture(&[]);
        submit(&mut store, SignalCategory::Static, TriValue::Proved);
        submit(&mut store, SignalCategory::Smt, TriValue::Disproved);
        let v = aggregate(&store, &clauses, &ScoreConfig::default());
        assert_eq!(v.decision, Decision::NoShip);
    }

    #[test]
    fn non_blocking_disproof_degrades_to_warn_or_noship_by_score() {
        let (clauses, mut store) = fixture(&[]);
        // Default blocking categories include smt only; a chaos disproof
        // lowers the score without forcing the decision.
        submit(&mut store, SignalCategory::Static, TriValue::Proved);
        submit(&mut store, SignalCategory::Evaluator, TriValue::Proved);
        submit(&mut store, SignalCategory::Chaos, TriValue::Disproved);
        let v = aggregate(&store, &clauses, &ScoreConfig::default());
        assert!(v.blockers.is_empty());
        assert_ne!(v.decision, Decision::Ship);
    }

    #[test]
    fn unresolved_clauses_are_reported() {
        let (clauses, mut store) = fixture(&[]);
        submit(
            &mut store,
            SignalCategory::Smt,
            TriValue::Unknown(credence_verify::UnknownReason::Timeout),
        );
        let v = aggregate(&store, &clauses, &ScoreConfig::default());
        assert!(v
            .recommendations
            .iter()
            .any(|r| r.contains("unresolved")));
    }

    #[test]
    fn verdict_json_uses_stable_names() {
        let (clauses, mut store) = fixture(&[]);
        submit(&mut store, SignalCategory::Smt, TriValue::Disproved);
        let v = aggregate(&store, &clauses, &ScoreConfig::default());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["decision"], "no_ship");
        assert!(json["score"]["value"].is_number());
    }
}
