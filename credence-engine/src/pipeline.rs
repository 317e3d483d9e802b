#![forbid(unsafe_code)]

//! The per-clause resolution pipeline: evaluate, consult the solver,
//! classify the residual Unknown, run the mitigation chain, shrink any
//! concrete witness. Each stage leaves an audit note and an evidence
//! record; the caller merges those under the single-writer discipline.

use std::time::Duration;

use credence_clause::{Bindings, Clause, ClauseId, EvalContext};
use credence_report::{AuditNote, Confidence, EvidenceRecord, SignalCategory, Stage};
use credence_verify::{
    classify, eval_clause, mitigate, shrink, BudgetGauge, CachedResult, Counterexample,
    Fingerprint, MitigationConfig, MitigationStrategy, SmtCache, Solve, TriValue, UnknownReason,
};

/// Stage knobs for one run, derived from the budget config.
#[derive(Clone, Copy, Debug)]
pub struct StageBudget {
    pub solver_timeout: Duration,
    pub relaxed_solver_timeout: Duration,
    pub max_shrink_steps: u32,
    /// Single timestamp stamped on every record of the run.
    pub timestamp_ms: u64,
}

/// Everything one clause's trip through the pipeline produced.
#[derive(Clone, Debug)]
pub struct ClauseOutcome {
    pub clause_id: ClauseId,
    pub value: TriValue,
    pub counterexample: Option<Counterexample>,
    pub evidence: Vec<EvidenceRecord>,
    /// Decisive solver results, applied to the shared cache after the
    /// parallel phase.
    pub cache_inserts: Vec<(Fingerprint, CachedResult)>,
    pub audit: Vec<AuditNote>,
    pub exhausted: bool,
}

struct PipelineRun<'a> {
    clause: &'a Clause,
    budget: &'a StageBudget,
    out: ClauseOutcome,
}

impl<'a> PipelineRun<'a> {
    fn new(clause: &'a Clause, budget: &'a StageBudget) -> Self {
        Self {
            clause,
            budget,
            out: ClauseOutcome {
                clause_id: clause.id.clone(),
                value: TriValue::Unknown(UnknownReason::ResourceExhausted),
                counterexample: None,
                evidence: Vec::new(),
                cache_inserts: Vec::new(),
                audit: Vec::new(),
                exhausted: false,
            },
        }
    }

    fn note(&mut self, stage: Stage, message: impl Into<String>) {
        self.out.audit.push(AuditNote {
            clause_id: self.clause.id.clone(),
            stage,
            message: message.into(),
        });
    }

    fn record(
        &mut self,
        category: SignalCategory,
        verdict: TriValue,
        counterexample: Option<Counterexample>,
        confidence: Confidence,
        source: &str,
    ) {
        self.out.evidence.push(EvidenceRecord {
            clause_id: self.clause.id.clone(),
            category,
            verdict,
            counterexample,
            confidence,
            source: source.to_string(),
            timestamp_ms: self.budget.timestamp_ms,
        });
    }

    fn finish(mut self, value: TriValue) -> ClauseOutcome {
        self.out.value = value;
        self.out
    }
}

/// Resolve one clause. The cache is read-only here; decisive solver results
/// come back in `cache_inserts` for the caller to merge.
pub fn verify_clause(
    clause: &Clause,
    ctx: &EvalContext,
    solver: &mut dyn Solve,
    cache: &SmtCache,
    gauge: &BudgetGauge,
    budget: &StageBudget,
) -> ClauseOutcome {
    let mut run = PipelineRun::new(clause, budget);

    // Stage 1: direct evaluation against the environment.
    let eval = eval_clause(clause, ctx);
    run.note(
        Stage::Evaluate,
        format!(
            "{} ({} nodes, depth {})",
            eval.value, eval.telemetry.node_count, eval.telemetry.max_depth
        ),
    );

    if !eval.value.is_unknown() {
        let cx = if eval.value.is_disproved() {
            witness_to_counterexample(&mut run, ctx, eval.witness.as_ref(), budget)
        } else {
            None
        };
        run.record(
            SignalCategory::Evaluator,
            eval.value.clone(),
            cx.clone(),
            Confidence::High,
            "evaluator",
        );
        run.out.counterexample = cx;
        return run.finish(eval.value);
    }

    let reason = match &eval.value {
        TriValue::Unknown(r) => r.clone(),
        _ => unreachable!("decided values return above"),
    };
    run.record(
        SignalCategory::Evaluator,
        eval.value.clone(),
        None,
        Confidence::Low,
        "evaluator",
    );

    if gauge.expired() {
        run.note(Stage::Smt, "skipped: pipeline deadline reached");
        run.out.exhausted = true;
        return run.finish(TriValue::Unknown(UnknownReason::ResourceExhausted));
    }

    // Stage 2: refutation-style solver pass at the standard timeout.
    let smt_value = if gauge.try_take_smt_call() {
        let res = credence_verify::resolve(clause, ctx, solver, cache, budget.solver_timeout);
        run.note(
            Stage::Smt,
            match (&res.fingerprint, res.cache_hit) {
                (Some(fp), true) => format!("{} (cache hit {})", res.value, short(fp)),
                (Some(fp), false) => format!("{} via {} ({})", res.value, solver.name(), short(fp)),
                (None, _) => format!("untranslatable: {}", res.value),
            },
        );
        run.out.cache_inserts.extend(res.cache_insert);

        if !res.value.is_unknown() {
            let cx = if res.value.is_disproved() {
                witness_to_counterexample(&mut run, ctx, res.model.as_ref(), budget)
            } else {
                None
            };
            let source = format!("smt:{}", solver.name());
            run.record(
                SignalCategory::Smt,
                res.value.clone(),
                cx.clone(),
                Confidence::High,
                &source,
            );
            run.out.counterexample = cx;
            return run.finish(res.value);
        }
        res.value
    } else {
        run.note(Stage::Smt, "skipped: SMT call quota spent");
        TriValue::Unknown(UnknownReason::ResourceExhausted)
    };

    // Carry the more specific of the two unknowns into classification.
    let refined = match smt_value {
        TriValue::Unknown(r) => reason.combine(r),
        _ => reason,
    };

    // Stage 3: classify and run the mitigation chain.
    let classification = classify(&refined, &eval.telemetry);
    run.note(
        Stage::Classify,
        format!(
            "{:?}: {}",
            classification.category,
            classification
                .strategies
                .iter()
                .map(|s| format!("{s:?}"))
                .collect::<Vec<_>>()
                .join(" -> ")
        ),
    );

    let mit_cfg = MitigationConfig {
        relaxed_solver_timeout: budget.relaxed_solver_timeout,
    };
    let outcome = mitigate(
        clause,
        ctx,
        &refined,
        &classification,
        &mit_cfg,
        gauge,
        solver,
        cache,
    );

    for attempt in &outcome.attempts {
        run.note(
            Stage::Mitigate,
            format!("{:?}: {} ({})", attempt.strategy, attempt.value, attempt.note),
        );
        let (category, confidence, source) = attempt_signal(attempt.strategy, solver.name());
        let decisive = !attempt.value.is_unknown();
        let cx = if decisive && attempt.value.is_disproved() {
            witness_to_counterexample(&mut run, ctx, outcome.witness.as_ref(), budget)
        } else {
            None
        };
        run.record(category, attempt.value.clone(), cx.clone(), confidence, &source);
        if cx.is_some() {
            run.out.counterexample = cx;
        }
    }
    run.out.cache_inserts.extend(outcome.cache_inserts.iter().cloned());
    run.out.exhausted = outcome.exhausted;

    run.finish(outcome.value)
}

/// Map a mitigation strategy onto the evidence signal it produces.
fn attempt_signal(
    strategy: MitigationStrategy,
    solver_name: &str,
) -> (SignalCategory, Confidence, String) {
    match strategy {
        // Concrete trace replay; traces may be stale relative to the
        // current build, so disproofs rank below a solver model.
        MitigationStrategy::RuntimeSampling => (
            SignalCategory::Pbt,
            Confidence::Medium,
            "mitigation:runtime-sampling".to_string(),
        ),
        MitigationStrategy::FallbackHeuristic => (
            SignalCategory::Evaluator,
            Confidence::Medium,
            "mitigation:interval-heuristic".to_string(),
        ),
        MitigationStrategy::ConstraintSlicing => (
            SignalCategory::Evaluator,
            Confidence::Medium,
            "mitigation:constraint-slicing".to_string(),
        ),
        MitigationStrategy::SmtRetryRelaxed => (
            SignalCategory::Smt,
            Confidence::High,
            format!("mitigation:smt-relaxed:{solver_name}"),
        ),
    }
}

fn short(fp: &Fingerprint) -> String {
    fp.as_hex().chars().take(12).collect()
}

fn witness_to_counterexample(
    run: &mut PipelineRun<'_>,
    ctx: &EvalContext,
    witness: Option<&Bindings>,
    budget: &StageBudget,
) -> Option<Counterexample> {
    let witness = witness?;
    let cx = shrink(run.clause, ctx, witness, budget.max_shrink_steps);
    run.note(Stage::Shrink, cx.summary());
    Some(cx)
}
