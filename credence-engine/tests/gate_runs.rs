//! End-to-end gate runs through the public engine API.

use credence_clause::build::*;
use credence_clause::{BinOp, Clause, ClauseId, ClauseKind, ClauseSet, EvalContext, Value};
use credence_engine::Engine;
use credence_report::{
    Confidence, Decision, EvidenceRecord, RunConfig, SignalCategory, SubmitError,
};
use credence_verify::{NoSolver, SatOutcome, ScriptedSolver, Solve, TriValue};

fn invariant(loc: &str, body: credence_clause::Expr) -> Clause {
    Clause::new(ClauseId::new(loc, ClauseKind::Invariant), body)
}

fn clauses() -> ClauseSet {
    [
        // Decidable concretely.
        invariant("ledger.spec:3", bin(var("balance"), BinOp::Ge, int(0))),
        // Needs the solver: x is symbolic.
        invariant("ledger.spec:9", bin(var("x"), BinOp::Ge, int(0))),
    ]
    .into_iter()
    .collect()
}

fn env() -> EvalContext {
    EvalContext::new()
        .bind("balance", Value::Int(250))
        .mark_symbolic("x")
}

#[test]
fn concrete_and_solver_backed_clauses_resolve_in_one_run() {
    let mut engine = Engine::new(clauses(), RunConfig::default()).unwrap();
    let make = || Box::new(ScriptedSolver::new().respond_all(SatOutcome::Unsat)) as Box<dyn Solve>;
    let report = engine.run(&env(), &make).unwrap();

    assert_eq!(report.outcomes.len(), 2);
    for outcome in &report.outcomes {
        assert_eq!(outcome.value, TriValue::Proved, "{}", outcome.clause_id);
    }
    assert!(!report.exhausted);
    assert_eq!(report.verdict.decision, Decision::Ship);
    assert!(!report.audit.is_empty());
}

#[test]
fn decisive_solver_results_persist_in_the_cache_across_runs() {
    let mut engine = Engine::new(clauses(), RunConfig::default()).unwrap();
    let make = || Box::new(ScriptedSolver::new().respond_all(SatOutcome::Unsat)) as Box<dyn Solve>;
    engine.run(&env(), &make).unwrap();
    assert!(engine.cache_len() > 0);

    // Second run against a solver that would refuse to answer: the cache
    // alone must carry the symbolic clause to Proved.
    let stubborn = || Box::new(NoSolver) as Box<dyn Solve>;
    let report = engine.run(&env(), &stubborn).unwrap();
    let symbolic = report
        .outcomes
        .iter()
        .find(|o| o.clause_id == ClauseId::new("ledger.spec:9", ClauseKind::Invariant))
        .unwrap();
    assert_eq!(symbolic.value, TriValue::Proved);

    engine.clear_cache();
    assert_eq!(engine.cache_len(), 0);
}

#[test]
fn solver_counterexample_blocks_the_release() {
    let mut engine = Engine::new(clauses(), RunConfig::default()).unwrap();
    let make = || {
        let mut model = credence_clause::Bindings::new();
        model.insert("x".to_string(), Value::Int(-17));
        Box::new(ScriptedSolver::new().respond_all(SatOutcome::Sat(model))) as Box<dyn Solve>
    };
    let report = engine.run(&env(), &make).unwrap();

    // Default config treats smt as a blocking category.
    assert_eq!(report.verdict.decision, Decision::NoShip);
    let disproved = report
        .outcomes
        .iter()
        .find(|o| o.value.is_disproved())
        .expect("symbolic clause is disproved by the model");
    let cx = disproved.counterexample.as_ref().unwrap();
    assert!(cx.inputs.iter().any(|(name, _)| name == "x"));
}

#[test]
fn external_evidence_is_validated_per_record() {
    let mut engine = Engine::new(clauses(), RunConfig::default()).unwrap();
    let known = ClauseId::new("ledger.spec:3", ClauseKind::Invariant);
    let bogus = ClauseId::new("ghost.spec:1", ClauseKind::Invariant);

    let record = |id: ClauseId| EvidenceRecord {
        clause_id: id,
        category: SignalCategory::Static,
        verdict: TriValue::Proved,
        counterexample: None,
        confidence: Confidence::Medium,
        source: "static:linter".to_string(),
        timestamp_ms: 0,
    };

    let results = engine.submit_evidence(vec![record(known), record(bogus)]);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(SubmitError::UnknownClause(_))));
}

#[test]
fn external_disproof_with_blocking_tag_forces_no_ship() {
    let mut set = clauses();
    let mut tagged = invariant("auth.spec:1", bin(var("ok"), BinOp::Eq, boolean(true)));
    tagged.meta.tags.insert("security".to_string());
    set.insert(tagged);

    let mut engine = Engine::new(set, RunConfig::default()).unwrap();
    let results = engine.submit_evidence(vec![EvidenceRecord {
        clause_id: ClauseId::new("auth.spec:1", ClauseKind::Invariant),
        category: SignalCategory::Chaos,
        verdict: TriValue::Disproved,
        counterexample: None,
        confidence: Confidence::High,
        source: "chaos:fault-injection".to_string(),
        timestamp_ms: 0,
    }]);
    assert!(results[0].is_ok());

    let env = env().bind("ok", Value::Bool(true));
    let make = || Box::new(ScriptedSolver::new().respond_all(SatOutcome::Unsat)) as Box<dyn Solve>;
    let report = engine.run(&env, &make).unwrap();
    assert_eq!(report.verdict.decision, Decision::NoShip);
    assert!(report
        .verdict
        .blockers
        .contains(&ClauseId::new("auth.spec:1", ClauseKind::Invariant)));
}

#[test]
fn single_worker_and_many_workers_agree_on_the_verdict() {
    let make = || Box::new(ScriptedSolver::new().respond_all(SatOutcome::Unsat)) as Box<dyn Solve>;

    let mut one = RunConfig::default();
    one.budget.workers = 1;
    let mut engine_one = Engine::new(clauses(), one).unwrap();
    let report_one = engine_one.run(&env(), &make).unwrap();

    let mut many = RunConfig::default();
    many.budget.workers = 8;
    let mut engine_many = Engine::new(clauses(), many).unwrap();
    let report_many = engine_many.run(&env(), &make).unwrap();

    assert_eq!(report_one.verdict.decision, report_many.verdict.decision);
    assert_eq!(report_one.verdict.score.value, report_many.verdict.score.value);
    let values = |r: &credence_engine::GateReport| {
        r.outcomes
            .iter()
            .map(|o| (o.clause_id.clone(), o.value.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(values(&report_one), values(&report_many));
}

#[test]
fn zero_smt_quota_leaves_symbolic_clauses_unknown_not_proved() {
    let mut cfg = RunConfig::default();
    cfg.budget.smt_call_quota = 0;
    let mut engine = Engine::new(clauses(), cfg).unwrap();
    let make = || Box::new(ScriptedSolver::new().respond_all(SatOutcome::Unsat)) as Box<dyn Solve>;
    let report = engine.run(&env(), &make).unwrap();

    let symbolic = report
        .outcomes
        .iter()
        .find(|o| o.clause_id == ClauseId::new("ledger.spec:9", ClauseKind::Invariant))
        .unwrap();
    assert!(
        symbolic.value.is_unknown(),
        "budget exhaustion must degrade to Unknown, got {:?}",
        symbolic.value
    );
}
