//! Boundary scenarios for the score/verdict fold, driven end to end
//! through the public API.

use credence_clause::build::*;
use credence_clause::{BinOp, Clause, ClauseId, ClauseKind, ClauseSet};
use credence_report::{
    aggregate, Confidence, Decision, EvidenceRecord, EvidenceStore, PenaltyRule, ScoreConfig,
    SignalCategory,
};
use credence_verify::{TriValue, UnknownReason};

fn clause(loc: &str, tags: &[&str]) -> Clause {
    let mut c = Clause::new(
        ClauseId::new(loc, ClauseKind::Invariant),
        bin(var("n"), BinOp::Ge, int(0)),
    );
    c.meta.tags = tags.iter().map(|t| t.to_string()).collect();
    c
}

fn submit(store: &mut EvidenceStore, loc: &str, cat: SignalCategory, verdict: TriValue) {
    store
        .submit(EvidenceRecord {
            clause_id: ClauseId::new(loc, ClauseKind::Invariant),
            category: cat,
            verdict,
            counterexample: None,
            confidence: Confidence::High,
            source: format!("{cat}:test"),
            timestamp_ms: 1,
        })
        .unwrap();
}

#[test]
fn everything_proved_everywhere_scores_one_hundred_and_ships() {
    let clauses: ClauseSet = [clause("a.spec:1", &[]), clause("b.spec:2", &[])]
        .into_iter()
        .collect();
    let mut store = EvidenceStore::for_clauses(&clauses);
    for loc in ["a.spec:1", "b.spec:2"] {
        for cat in SignalCategory::ALL {
            submit(&mut store, loc, cat, TriValue::Proved);
        }
    }
    let v = aggregate(&store, &clauses, &ScoreConfig::default());
    assert_eq!(v.score.value, 100.0);
    assert_eq!(v.decision, Decision::Ship);
}

#[test]
fn security_disproof_blocks_regardless_of_numeric_score() {
    let clauses: ClauseSet = [clause("auth.spec:4", &["security"]), clause("b.spec:2", &[])]
        .into_iter()
        .collect();
    let mut store = EvidenceStore::for_clauses(&clauses);
    for cat in SignalCategory::ALL {
        submit(&mut store, "b.spec:2", cat, TriValue::Proved);
        let verdict = if cat == SignalCategory::Chaos {
            TriValue::Disproved
        } else {
            TriValue::Proved
        };
        submit(&mut store, "auth.spec:4", cat, verdict);
    }
    let v = aggregate(&store, &clauses, &ScoreConfig::default());
    assert_eq!(v.decision, Decision::NoShip);
    assert!(v
        .blockers
        .contains(&ClauseId::new("auth.spec:4", ClauseKind::Invariant)));
    // The score itself can stay high; the block is categorical.
    assert!(v.score.value > 80.0);
}

#[test]
fn one_enormous_weight_cannot_exceed_the_single_signal_cap() {
    let clauses: ClauseSet = [clause("a.spec:1", &[])].into_iter().collect();
    let mut store = EvidenceStore::for_clauses(&clauses);
    submit(&mut store, "a.spec:1", SignalCategory::Smt, TriValue::Proved);
    submit(&mut store, "a.spec:1", SignalCategory::Pbt, TriValue::Disproved);

    let mut cfg = ScoreConfig::default();
    cfg.weights.insert(SignalCategory::Smt, 1.0e6);
    let v = aggregate(&store, &clauses, &cfg);
    let cap_points = cfg.single_signal_cap * 100.0;
    for s in &v.score.breakdown {
        assert!(
            s.capped_contribution <= cap_points + f64::EPSILON,
            "{} contributes {} past the cap",
            s.category,
            s.capped_contribution
        );
    }
    assert!(v.score.value <= cap_points);
}

#[test]
fn uniform_unknowns_score_exactly_the_partial_credit() {
    let clauses: ClauseSet = [clause("a.spec:1", &[])].into_iter().collect();
    let mut store = EvidenceStore::for_clauses(&clauses);
    for cat in SignalCategory::ALL {
        submit(
            &mut store,
            "a.spec:1",
            cat,
            TriValue::Unknown(UnknownReason::Timeout),
        );
    }
    let cfg = ScoreConfig::default();
    let v = aggregate(&store, &clauses, &cfg);
    assert_eq!(v.score.value, 100.0 * cfg.unknown_partial_credit);
    assert_eq!(v.decision, Decision::NoShip);
}

#[test]
fn ceiling_penalty_forces_no_ship() {
    let clauses: ClauseSet = [clause("pay.spec:7", &["money"])].into_iter().collect();
    let mut store = EvidenceStore::for_clauses(&clauses);
    // Disproof arrives from a non-blocking category; only the penalty's
    // ceiling turns this into a hard block.
    submit(&mut store, "pay.spec:7", SignalCategory::Static, TriValue::Proved);
    submit(&mut store, "pay.spec:7", SignalCategory::Evaluator, TriValue::Proved);
    submit(&mut store, "pay.spec:7", SignalCategory::Pbt, TriValue::Disproved);

    let mut cfg = ScoreConfig::default();
    cfg.blocking_tags.clear();
    cfg.penalties.push(PenaltyRule {
        tag: "money".to_string(),
        deduction: 30.0,
        score_ceiling: Some(10.0),
    });
    let v = aggregate(&store, &clauses, &cfg);
    assert!(v.score.value <= 10.0);
    assert_eq!(v.decision, Decision::NoShip);
}

#[test]
fn aggregation_is_idempotent_bit_for_bit() {
    let clauses: ClauseSet = [clause("a.spec:1", &["flaky"]), clause("b.spec:2", &[])]
        .into_iter()
        .collect();
    let mut store = EvidenceStore::for_clauses(&clauses);
    submit(&mut store, "a.spec:1", SignalCategory::Pbt, TriValue::Disproved);
    submit(&mut store, "a.spec:1", SignalCategory::Smt, TriValue::Proved);
    submit(
        &mut store,
        "b.spec:2",
        SignalCategory::Chaos,
        TriValue::Unknown(UnknownReason::Complexity(3)),
    );

    let mut cfg = ScoreConfig::default();
    cfg.penalties.push(PenaltyRule {
        tag: "flaky".to_string(),
        deduction: 7.5,
        score_ceiling: None,
    });

    let first = aggregate(&store, &clauses, &cfg);
    let second = aggregate(&store, &clauses, &cfg);
    assert_eq!(first, second);
    assert_eq!(first.score.value.to_bits(), second.score.value.to_bits());
}

#[test]
fn later_evidence_supersedes_earlier_for_the_same_signal() {
    let clauses: ClauseSet = [clause("a.spec:1", &[])].into_iter().collect();
    let mut store = EvidenceStore::for_clauses(&clauses);
    for cat in SignalCategory::ALL {
        submit(&mut store, "a.spec:1", cat, TriValue::Proved);
    }
    submit(&mut store, "a.spec:1", SignalCategory::Smt, TriValue::Disproved);
    submit(&mut store, "a.spec:1", SignalCategory::Smt, TriValue::Proved);
    let v = aggregate(&store, &clauses, &ScoreConfig::default());
    assert!(v.blockers.is_empty(), "superseded disproof must not block");
    assert_eq!(v.decision, Decision::Ship);
}
