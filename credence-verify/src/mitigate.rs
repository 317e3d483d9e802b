#![forbid(unsafe_code)]

//! The mitigation pipeline: a finite, strictly-ordered chain of bounded
//! strategies that tries to resolve an Unknown clause.
//!
//! The chain stops at the first non-Unknown result or when the budget runs
//! out. An exhausted budget is reported as Unknown with ResourceExhausted,
//! never silently promoted to Proved. That is the one invariant everything
//! else here bends around.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use credence_clause::{BinOp, Bindings, Clause, EvalContext, Expr, ExprKind, UnaryOp, Value};

use crate::classify::{Classification, MitigationStrategy};
use crate::eval::eval_clause;
use crate::smt::{self, CachedResult, Fingerprint, SmtCache};
use crate::solver::Solve;
use crate::trivalue::{TriValue, UnknownReason};

/// Per-pipeline budget, shared across the clauses of one run.
///
/// The wall-clock deadline and the SMT call quota are independent; each is
/// checked cooperatively at stage boundaries. Exceeding either cancels only
/// the in-flight clause's chain, not the whole run.
#[derive(Clone, Debug)]
pub struct BudgetGauge {
    deadline: Option<Instant>,
    smt_quota: Arc<AtomicU32>,
}

impl BudgetGauge {
    pub fn new(deadline: Option<Instant>, smt_call_quota: u32) -> Self {
        Self {
            deadline,
            smt_quota: Arc::new(AtomicU32::new(smt_call_quota)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, u32::MAX)
    }

    pub fn expired(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Take one SMT call from the shared quota. Returns false when spent.
    pub fn try_take_smt_call(&self) -> bool {
        self.smt_quota
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| q.checked_sub(1))
            .is_ok()
    }

    pub fn remaining_smt_calls(&self) -> u32 {
        self.smt_quota.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MitigationConfig {
    /// Relaxed solver timeout used by the SmtRetryRelaxed strategy.
    pub relaxed_solver_timeout: Duration,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            relaxed_solver_timeout: Duration::from_millis(2000),
        }
    }
}

/// One strategy execution, kept for the audit trail and evidence records.
#[derive(Clone, Debug, PartialEq)]
pub struct MitigationAttempt {
    pub strategy: MitigationStrategy,
    pub value: TriValue,
    pub note: String,
    pub cache_hit: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MitigationOutcome {
    pub value: TriValue,
    /// Falsifying bindings when a strategy disproved the clause concretely.
    pub witness: Option<Bindings>,
    pub attempts: Vec<MitigationAttempt>,
    /// Decisive SMT results for the single-writer cache merge.
    pub cache_inserts: Vec<(Fingerprint, CachedResult)>,
    /// True when the chain was cut short by the budget.
    pub exhausted: bool,
}

/// Run the mitigation chain for one clause.
///
/// Strategies run strictly in the classifier's priority order; no racing,
/// so the chosen resolution path stays deterministic and explainable.
pub fn mitigate(
    clause: &Clause,
    ctx: &EvalContext,
    original: &UnknownReason,
    classification: &Classification,
    cfg: &MitigationConfig,
    gauge: &BudgetGauge,
    solver: &mut dyn Solve,
    cache: &SmtCache,
) -> MitigationOutcome {
    let mut attempts = Vec::new();
    let mut cache_inserts = Vec::new();
    let mut refined = original.clone();

    for strategy in &classification.strategies {
        if gauge.expired() {
            return exhausted_outcome(attempts, cache_inserts);
        }

        let attempt = match strategy {
            MitigationStrategy::RuntimeSampling => sample(clause, ctx),
            MitigationStrategy::FallbackHeuristic => heuristic(clause, ctx),
            MitigationStrategy::ConstraintSlicing => slice(clause, ctx),
            MitigationStrategy::SmtRetryRelaxed => {
                if !gauge.try_take_smt_call() {
                    attempts.push(MitigationAttempt {
                        strategy: *strategy,
                        value: TriValue::Unknown(UnknownReason::ResourceExhausted),
                        note: "SMT call quota spent".to_string(),
                        cache_hit: false,
                    });
                    return exhausted_outcome(attempts, cache_inserts);
                }
                smt_retry(clause, ctx, cfg, solver, cache, &mut cache_inserts)
            }
        };

        let resolved = !attempt.result.is_unknown();
        if let TriValue::Unknown(r) = &attempt.result {
            refined = refined.clone().combine(r.clone());
        }
        attempts.push(MitigationAttempt {
            strategy: *strategy,
            value: attempt.result.clone(),
            note: attempt.note,
            cache_hit: attempt.cache_hit,
        });
        if resolved {
            return MitigationOutcome {
                value: attempt.result,
                witness: attempt.witness,
                attempts,
                cache_inserts,
                exhausted: false,
            };
        }
    }

    MitigationOutcome {
        value: TriValue::Unknown(refined),
        witness: None,
        attempts,
        cache_inserts,
        exhausted: false,
    }
}

fn exhausted_outcome(
    attempts: Vec<MitigationAttempt>,
    cache_inserts: Vec<(Fingerprint, CachedResult)>,
) -> MitigationOutcome {
    MitigationOutcome {
        value: TriValue::Unknown(UnknownReason::ResourceExhausted),
        witness: None,
        attempts,
        cache_inserts,
        exhausted: true,
    }
}

struct AttemptResult {
    result: TriValue,
    witness: Option<Bindings>,
    note: String,
    cache_hit: bool,
}

impl AttemptResult {
    fn plain(result: TriValue, note: impl Into<String>) -> Self {
        Self {
            result,
            witness: None,
            note: note.into(),
            cache_hit: false,
        }
    }
}

/// Runtime sampling: replay recorded concrete traces through the evaluator.
///
/// One failing trace disproves the clause. Passing traces can never prove a
/// universal claim, so an all-pass outcome stays Unknown with a refined
/// reason; promotion to Proved is reserved for sound stages.
fn sample(clause: &Clause, ctx: &EvalContext) -> AttemptResult {
    if ctx.traces.is_empty() {
        return AttemptResult::plain(
            TriValue::Unknown(UnknownReason::UnsupportedFeature(
                "no concrete traces recorded".to_string(),
            )),
            "no traces available",
        );
    }

    let mut passed = 0usize;
    for (idx, trace) in ctx.traces.iter().enumerate() {
        let replayed = ctx.overlaid(trace);
        let out = eval_clause(clause, &replayed);
        match out.value {
            TriValue::Disproved => {
                return AttemptResult {
                    result: TriValue::Disproved,
                    witness: out.witness.or_else(|| Some(trace.clone())),
                    note: format!("trace {} of {} falsifies the clause", idx + 1, ctx.traces.len()),
                    cache_hit: false,
                };
            }
            TriValue::Proved => passed += 1,
            TriValue::Unknown(_) => {}
        }
    }

    AttemptResult::plain(
        TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
            "sampling found no failure ({passed}/{} traces pass)",
            ctx.traces.len()
        ))),
        "no falsifying trace",
    )
}

/// Fallback heuristic: interval bounds derived from the preconditions.
fn heuristic(clause: &Clause, ctx: &EvalContext) -> AttemptResult {
    let intervals = derive_intervals(&clause.preconditions, ctx);
    let value = interval_truth(&clause.expr, ctx, &intervals);

    match value {
        TriValue::Disproved => {
            // The interval env only sees `var <op> literal` preconditions;
            // a precondition outside that fragment may make the whole
            // region infeasible. Only a concrete endpoint replay (which
            // re-checks every precondition) turns this into a disproof.
            let witness = endpoint_witness(clause, ctx, &intervals);
            match witness {
                Some(w) => AttemptResult {
                    result: TriValue::Disproved,
                    witness: Some(w),
                    note: "interval analysis disproved; endpoint witness confirmed".to_string(),
                    cache_hit: false,
                },
                None => AttemptResult::plain(
                    TriValue::Unknown(UnknownReason::TheoryIncomplete),
                    "interval disproof lacked a confirming witness",
                ),
            }
        }
        TriValue::Proved => AttemptResult::plain(
            TriValue::Proved,
            "interval analysis proved within precondition bounds",
        ),
        unknown => AttemptResult::plain(unknown, "interval analysis inconclusive"),
    }
}

/// Constraint slicing: split a conjunctive body into independent conjuncts,
/// decide each separately (evaluator first, interval heuristic second), and
/// fold with the algebra. At minimum this refines the Unknown reason to the
/// conjuncts that actually resist resolution.
fn slice(clause: &Clause, ctx: &EvalContext) -> AttemptResult {
    let conjuncts = split_conjuncts(&clause.expr);
    if conjuncts.len() < 2 {
        return AttemptResult::plain(
            TriValue::Unknown(UnknownReason::UnsupportedFeature(
                "body is not a conjunction".to_string(),
            )),
            "nothing to slice",
        );
    }

    let intervals = derive_intervals(&clause.preconditions, ctx);
    let pre = TriValue::all(
        clause
            .preconditions
            .iter()
            .map(|p| crate::eval::eval_expr(p, ctx)),
    );

    let mut resolved = 0usize;
    let mut folded = TriValue::Proved;
    for conjunct in &conjuncts {
        let mut v = crate::eval::eval_expr(conjunct, ctx);
        if v.is_unknown() {
            v = interval_truth(conjunct, ctx, &intervals);
        }
        if !v.is_unknown() {
            resolved += 1;
        }
        folded = folded.and(v);
        if folded.is_disproved() {
            break;
        }
    }

    let value = pre.implies(folded);
    let note = format!("resolved {resolved}/{} conjuncts", conjuncts.len());
    AttemptResult::plain(value, note)
}

fn smt_retry(
    clause: &Clause,
    ctx: &EvalContext,
    cfg: &MitigationConfig,
    solver: &mut dyn Solve,
    cache: &SmtCache,
    cache_inserts: &mut Vec<(Fingerprint, CachedResult)>,
) -> AttemptResult {
    let res = smt::resolve(clause, ctx, solver, cache, cfg.relaxed_solver_timeout);
    if let Some(insert) = res.cache_insert {
        cache_inserts.push(insert);
    }
    let note = if res.cache_hit {
        "relaxed solve answered from cache".to_string()
    } else {
        format!(
            "relaxed solve ({} ms budget)",
            cfg.relaxed_solver_timeout.as_millis()
        )
    };
    AttemptResult {
        result: res.value,
        witness: res.model,
        note,
        cache_hit: res.cache_hit,
    }
}

fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    fn walk<'e>(e: &'e Expr, out: &mut Vec<&'e Expr>) {
        match &e.kind {
            ExprKind::Binary {
                left,
                op: BinOp::And,
                right,
            } => {
                walk(left, out);
                walk(right, out);
            }
            _ => out.push(e),
        }
    }
    walk(expr, &mut out);
    out
}

// ---------------------------------------------------------------------------
// Interval arithmetic over symbolic integers, bounded by preconditions.
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Interval {
    lo: i64,
    hi: i64,
}

impl Interval {
    const FULL: Interval = Interval {
        lo: i64::MIN,
        hi: i64::MAX,
    };

    fn point(n: i64) -> Interval {
        Interval { lo: n, hi: n }
    }

    fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    fn intersect(self, other: Interval) -> Interval {
        Interval {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }

    fn add(self, other: Interval) -> Interval {
        Interval {
            lo: self.lo.saturating_add(other.lo),
            hi: self.hi.saturating_add(other.hi),
        }
    }

    fn sub(self, other: Interval) -> Interval {
        Interval {
            lo: self.lo.saturating_sub(other.hi),
            hi: self.hi.saturating_sub(other.lo),
        }
    }

    fn mul(self, other: Interval) -> Interval {
        let products = [
            self.lo.saturating_mul(other.lo),
            self.lo.saturating_mul(other.hi),
            self.hi.saturating_mul(other.lo),
            self.hi.saturating_mul(other.hi),
        ];
        Interval {
            lo: *products.iter().min().unwrap(),
            hi: *products.iter().max().unwrap(),
        }
    }

    fn neg(self) -> Interval {
        Interval {
            lo: self.hi.checked_neg().unwrap_or(i64::MAX),
            hi: self.lo.checked_neg().unwrap_or(i64::MAX),
        }
    }
}

type IntervalEnv = BTreeMap<String, Interval>;

/// Extract `var <op> literal` bounds from the precondition conjunctions.
fn derive_intervals(preconditions: &[Expr], ctx: &EvalContext) -> IntervalEnv {
    let mut env = IntervalEnv::new();
    for pre in preconditions {
        constrain(pre, ctx, &mut env);
    }
    env
}

fn constrain(expr: &Expr, ctx: &EvalContext, env: &mut IntervalEnv) {
    if let ExprKind::Binary { left, op, right } = &expr.kind {
        if *op == BinOp::And {
            constrain(left, ctx, env);
            constrain(right, ctx, env);
            return;
        }
        let (name, bound, op) = match (&left.kind, &right.kind) {
            (ExprKind::Var(name), ExprKind::Lit(Value::Int(n))) => (name, *n, *op),
            (ExprKind::Lit(Value::Int(n)), ExprKind::Var(name)) => (name, *n, flip(*op)),
            _ => return,
        };
        if !ctx.is_symbolic(name) {
            return;
        }
        let constraint = match op {
            BinOp::Ge => Interval { lo: bound, hi: i64::MAX },
            BinOp::Gt => Interval { lo: bound.saturating_add(1), hi: i64::MAX },
            BinOp::Le => Interval { lo: i64::MIN, hi: bound },
            BinOp::Lt => Interval { lo: i64::MIN, hi: bound.saturating_sub(1) },
            BinOp::Eq => Interval::point(bound),
            _ => return,
        };
        let current = env.get(name).copied().unwrap_or(Interval::FULL);
        env.insert(name.clone(), current.intersect(constraint));
    }
}

/// Mirror the comparison when the literal is on the left.
fn flip(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Le => BinOp::Ge,
        BinOp::Gt => BinOp::Lt,
        BinOp::Ge => BinOp::Le,
        other => other,
    }
}

fn interval_truth(expr: &Expr, ctx: &EvalContext, env: &IntervalEnv) -> TriValue {
    match &expr.kind {
        ExprKind::Lit(Value::Bool(b)) => TriValue::from_bool(*b),
        ExprKind::Unary {
            op: UnaryOp::Not,
            expr,
        } => interval_truth(expr, ctx, env).not(),
        ExprKind::Binary { left, op, right } => match op {
            BinOp::And => interval_truth(left, ctx, env).and(interval_truth(right, ctx, env)),
            BinOp::Or => interval_truth(left, ctx, env).or(interval_truth(right, ctx, env)),
            BinOp::Implies => {
                interval_truth(left, ctx, env).implies(interval_truth(right, ctx, env))
            }
            op if op.is_comparison() => {
                match (interval_term(left, ctx, env), interval_term(right, ctx, env)) {
                    (Some(l), Some(r)) => decide_comparison(l, *op, r),
                    _ => TriValue::Unknown(UnknownReason::UnsupportedFeature(
                        "term outside interval fragment".to_string(),
                    )),
                }
            }
            _ => TriValue::Unknown(UnknownReason::UnsupportedFeature(
                "operator outside interval fragment".to_string(),
            )),
        },
        _ => TriValue::Unknown(UnknownReason::UnsupportedFeature(
            "expression outside interval fragment".to_string(),
        )),
    }
}

fn interval_term(expr: &Expr, ctx: &EvalContext, env: &IntervalEnv) -> Option<Interval> {
    match &expr.kind {
        ExprKind::Lit(Value::Int(n)) => Some(Interval::point(*n)),
        ExprKind::Var(name) => {
            if let Some(Value::Int(n)) = ctx.lookup(name) {
                Some(Interval::point(*n))
            } else if ctx.is_symbolic(name) {
                Some(env.get(name).copied().unwrap_or(Interval::FULL))
            } else {
                None
            }
        }
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => Some(interval_term(expr, ctx, env)?.neg()),
        ExprKind::Binary { left, op, right } => {
            let l = interval_term(left, ctx, env)?;
            let r = interval_term(right, ctx, env)?;
            match op {
                BinOp::Add => Some(l.add(r)),
                BinOp::Sub => Some(l.sub(r)),
                BinOp::Mul => Some(l.mul(r)),
                // Division intervals are easy to get wrong; stay out.
                _ => None,
            }
        }
        _ => None,
    }
}

fn decide_comparison(l: Interval, op: BinOp, r: Interval) -> TriValue {
    if l.is_empty() || r.is_empty() {
        // Empty feasible region: the preconditions are unsatisfiable, so the
        // clause is vacuously true.
        return TriValue::Proved;
    }
    let (always, never) = match op {
        BinOp::Lt => (l.hi < r.lo, l.lo >= r.hi),
        BinOp::Le => (l.hi <= r.lo, l.lo > r.hi),
        BinOp::Gt => (l.lo > r.hi, l.hi <= r.lo),
        BinOp::Ge => (l.lo >= r.hi, l.hi < r.lo),
        BinOp::Eq => (
            l.lo == l.hi && r.lo == r.hi && l.lo == r.lo,
            l.hi < r.lo || r.hi < l.lo,
        ),
        BinOp::Ne => (
            l.hi < r.lo || r.hi < l.lo,
            l.lo == l.hi && r.lo == r.hi && l.lo == r.lo,
        ),
        _ => (false, false),
    };
    if always {
        TriValue::Proved
    } else if never {
        TriValue::Disproved
    } else {
        TriValue::Unknown(UnknownReason::TheoryIncomplete)
    }
}

/// Bind every symbolic variable to its interval's low endpoint and verify
/// the disproof concretely. Only a confirmed endpoint becomes a witness.
fn endpoint_witness(clause: &Clause, ctx: &EvalContext, env: &IntervalEnv) -> Option<Bindings> {
    let mut candidate = Bindings::new();
    for name in clause.free_vars() {
        if ctx.is_symbolic(&name) {
            let iv = env.get(&name).copied().unwrap_or(Interval::FULL);
            if iv.is_empty() || iv.lo == i64::MIN {
                return None;
            }
            candidate.insert(name, Value::Int(iv.lo));
        }
    }
    if candidate.is_empty() {
        return None;
    }
    let replayed = ctx.overlaid(&candidate);
    let out = eval_clause(clause, &replayed);
    if out.value.is_disproved() {
        out.witness.or(Some(candidate))
    } else {
        None
    }
}
