#![forbid(unsafe_code)]

//! SMT resolution: translate a residual constraint to solver form, check the
//! result cache by canonical fingerprint, invoke the abstract backend, and
//! map the answer back to a tri-state value plus counterexample model.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use miette::Diagnostic;
use sha2::{Digest, Sha256};
use thiserror::Error;

use credence_clause::{
    BinOp, Bindings, Clause, EvalContext, Expr, ExprKind, Quant, QuantDomain, UnaryOp, Value,
};

use crate::solver::{Formula, SatOutcome, Solve, Sort};
use crate::trivalue::{TriValue, UnknownReason};

#[derive(Debug, Error, Diagnostic)]
pub enum TranslateError {
    #[error("unbound variable `{0}`")]
    #[diagnostic(code(credence::smt::unbound))]
    Unbound(String),
    #[error("opaque call `{0}`")]
    #[diagnostic(code(credence::smt::opaque_call))]
    Opaque(String),
    #[error("quantifier over a symbolic domain")]
    #[diagnostic(code(credence::smt::symbolic_quantifier))]
    Quantifier,
    #[error("conflicting sorts inferred for `{0}`")]
    #[diagnostic(code(credence::smt::sort_conflict))]
    SortConflict(String),
    #[error("unsupported construct: {0}")]
    #[diagnostic(code(credence::smt::unsupported))]
    Unsupported(String),
}

impl TranslateError {
    pub fn reason(&self) -> UnknownReason {
        match self {
            TranslateError::Quantifier => UnknownReason::QuantifierInstantiation,
            other => UnknownReason::UnsupportedFeature(other.to_string()),
        }
    }
}

/// Translate a clause plus context into refutation form: assert every
/// precondition and the negated body. `unsat` then means the clause holds.
///
/// Concrete bindings are substituted as literals; enumerated quantifiers are
/// expanded; symbolic quantifiers and opaque calls abort translation.
pub fn translate(clause: &Clause, ctx: &EvalContext) -> Result<Formula, TranslateError> {
    let mut asserts = Vec::with_capacity(clause.preconditions.len() + 1);
    for pre in &clause.preconditions {
        asserts.push(lower(pre, ctx)?);
    }
    let body = lower(&clause.expr, ctx)?;
    asserts.push(Expr::new(ExprKind::Unary {
        op: UnaryOp::Not,
        expr: Box::new(body),
    }));

    let decls = infer_sorts(&asserts)?;
    Ok(Formula { decls, asserts })
}

fn lower(expr: &Expr, ctx: &EvalContext) -> Result<Expr, TranslateError> {
    match &expr.kind {
        ExprKind::Lit(_) => Ok(expr.clone()),
        ExprKind::Var(name) => {
            if let Some(v) = ctx.lookup(name) {
                Ok(Expr::new(ExprKind::Lit(v.clone())))
            } else if ctx.is_symbolic(name) {
                Ok(expr.clone())
            } else {
                Err(TranslateError::Unbound(name.clone()))
            }
        }
        ExprKind::Unary { op, expr } => Ok(Expr::new(ExprKind::Unary {
            op: *op,
            expr: Box::new(lower(expr, ctx)?),
        })),
        ExprKind::Binary { left, op, right } => Ok(Expr::new(ExprKind::Binary {
            left: Box::new(lower(left, ctx)?),
            op: *op,
            right: Box::new(lower(right, ctx)?),
        })),
        ExprKind::Call { name, .. } => Err(TranslateError::Opaque(name.clone())),
        ExprKind::Quantified {
            quant,
            var,
            domain,
            body,
        } => match domain {
            QuantDomain::Enumerated(elems) => {
                let mut parts = Vec::with_capacity(elems.len());
                for elem in elems {
                    let mut scoped = ctx.clone();
                    scoped.values.insert(var.clone(), elem.clone());
                    scoped.symbolic.remove(var);
                    parts.push(lower(body, &scoped)?);
                }
                Ok(fold_quant(*quant, parts))
            }
            QuantDomain::Symbolic(_) => Err(TranslateError::Quantifier),
        },
        ExprKind::Count { domain, .. } => match domain {
            QuantDomain::Symbolic(_) => Err(TranslateError::Quantifier),
            QuantDomain::Enumerated(_) => Err(TranslateError::Unsupported(
                "count aggregation in solver form".to_string(),
            )),
        },
    }
}

fn fold_quant(quant: Quant, parts: Vec<Expr>) -> Expr {
    let (op, identity) = match quant {
        Quant::All => (BinOp::And, true),
        Quant::Any | Quant::None => (BinOp::Or, false),
    };
    let mut iter = parts.into_iter();
    let folded = match iter.next() {
        None => Expr::new(ExprKind::Lit(Value::Bool(identity))),
        Some(first) => iter.fold(first, |acc, next| {
            Expr::new(ExprKind::Binary {
                left: Box::new(acc),
                op,
                right: Box::new(next),
            })
        }),
    };
    if matches!(quant, Quant::None) {
        Expr::new(ExprKind::Unary {
            op: UnaryOp::Not,
            expr: Box::new(folded),
        })
    } else {
        folded
    }
}

/// Infer Bool/Int sorts for the symbolic variables left in the asserts.
fn infer_sorts(asserts: &[Expr]) -> Result<Vec<(String, Sort)>, TranslateError> {
    let mut decls: Vec<(String, Sort)> = Vec::new();
    for assert in asserts {
        walk_sorts(assert, true, &mut decls)?;
    }
    Ok(decls)
}

fn walk_sorts(
    expr: &Expr,
    truth_position: bool,
    decls: &mut Vec<(String, Sort)>,
) -> Result<(), TranslateError> {
    match &expr.kind {
        ExprKind::Lit(_) => Ok(()),
        ExprKind::Var(name) => {
            let sort = if truth_position { Sort::Bool } else { Sort::Int };
            match decls.iter().find(|(n, _)| n == name) {
                Some((_, existing)) if *existing != sort => {
                    Err(TranslateError::SortConflict(name.clone()))
                }
                Some(_) => Ok(()),
                None => {
                    decls.push((name.clone(), sort));
                    Ok(())
                }
            }
        }
        ExprKind::Unary { op, expr } => {
            walk_sorts(expr, matches!(op, UnaryOp::Not), decls)
        }
        ExprKind::Binary { left, op, right } => {
            let operand_truth = op.is_logical();
            walk_sorts(left, operand_truth, decls)?;
            walk_sorts(right, operand_truth, decls)
        }
        ExprKind::Call { name, .. } => Err(TranslateError::Opaque(name.clone())),
        ExprKind::Quantified { .. } | ExprKind::Count { .. } => Err(TranslateError::Unsupported(
            "residual quantifier after lowering".to_string(),
        )),
    }
}

/// Canonical structural hash of a formula, independent of variable naming.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(formula: &Formula) -> Fingerprint {
    let mut canon = String::new();
    let mut names: Vec<String> = Vec::new();
    for assert in &formula.asserts {
        write_canon(assert, formula, &mut names, &mut canon);
        canon.push(';');
    }
    let mut hasher = Sha256::new();
    hasher.update(canon.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Canonical variable index by first occurrence across the assert list.
fn canon_index(name: &str, names: &mut Vec<String>) -> usize {
    if let Some(i) = names.iter().position(|n| n == name) {
        i
    } else {
        names.push(name.to_string());
        names.len() - 1
    }
}

fn write_canon(expr: &Expr, formula: &Formula, names: &mut Vec<String>, out: &mut String) {
    match &expr.kind {
        ExprKind::Lit(v) => write_canon_value(v, out),
        ExprKind::Var(name) => {
            let idx = canon_index(name, names);
            let sort = formula
                .decls
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, s)| match s {
                    Sort::Bool => "b",
                    Sort::Int => "i",
                })
                .unwrap_or("?");
            out.push_str(&format!("(v{idx}:{sort})"));
        }
        ExprKind::Unary { op, expr } => {
            out.push_str(match op {
                UnaryOp::Not => "(not ",
                UnaryOp::Neg => "(neg ",
            });
            write_canon(expr, formula, names, out);
            out.push(')');
        }
        ExprKind::Binary { left, op, right } => {
            out.push_str(&format!("({op:?} "));
            write_canon(left, formula, names, out);
            out.push(' ');
            write_canon(right, formula, names, out);
            out.push(')');
        }
        // Translation rejects these before fingerprinting; keep the hash
        // total anyway so the function never panics.
        ExprKind::Call { name, args } => {
            out.push_str(&format!("(call {name} "));
            for a in args {
                write_canon(a, formula, names, out);
            }
            out.push(')');
        }
        ExprKind::Quantified { quant, body, .. } => {
            out.push_str(&format!("({quant:?} "));
            write_canon(body, formula, names, out);
            out.push(')');
        }
        ExprKind::Count { body, expected, .. } => {
            out.push_str("(count ");
            write_canon(body, formula, names, out);
            out.push(' ');
            write_canon(expected, formula, names, out);
            out.push(')');
        }
    }
}

fn write_canon_value(v: &Value, out: &mut String) {
    match v {
        Value::Bool(b) => out.push_str(&format!("#{b}")),
        Value::Int(n) => out.push_str(&format!("#{n}")),
        Value::Str(s) => out.push_str(&format!("#{s:?}")),
        Value::List(xs) => {
            out.push_str("#[");
            for x in xs {
                write_canon_value(x, out);
                out.push(',');
            }
            out.push(']');
        }
    }
}

/// A decisive solver verdict, stored under the formula's fingerprint.
/// Model bindings use canonical variable names (`v0`, `v1`, ...) so a hit
/// from a renamed-but-identical formula rehydrates correctly.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResult {
    pub value: TriValue,
    pub model: Option<Bindings>,
}

/// SMT result cache. Entries are only removed by an explicit `clear` from
/// the orchestrator between independent runs, never implicitly.
#[derive(Clone, Debug, Default)]
pub struct SmtCache {
    entries: HashMap<Fingerprint, CachedResult>,
}

impl SmtCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<&CachedResult> {
        self.entries.get(fp)
    }

    /// Last-writer-wins: duplicate fingerprints are semantically identical
    /// formulas, so either writer's result is acceptable.
    pub fn insert(&mut self, fp: Fingerprint, result: CachedResult) {
        self.entries.insert(fp, result);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of one pass through the SMT stage.
#[derive(Clone, Debug, PartialEq)]
pub struct SmtResolution {
    pub value: TriValue,
    /// Counterexample model in the clause's own variable names.
    pub model: Option<Bindings>,
    pub fingerprint: Option<Fingerprint>,
    pub cache_hit: bool,
    /// New decisive result for the single-writer cache merge.
    pub cache_insert: Option<(Fingerprint, CachedResult)>,
}

impl SmtResolution {
    fn untranslatable(reason: UnknownReason) -> Self {
        Self {
            value: TriValue::Unknown(reason),
            model: None,
            fingerprint: None,
            cache_hit: false,
            cache_insert: None,
        }
    }
}

/// Resolve one clause through the solver, consulting `cache` first.
///
/// The cache is read-only here; the caller owns the write side (single-writer
/// discipline) and applies `cache_insert` after the parallel phase.
pub fn resolve(
    clause: &Clause,
    ctx: &EvalContext,
    solver: &mut dyn Solve,
    cache: &SmtCache,
    timeout: Duration,
) -> SmtResolution {
    let formula = match translate(clause, ctx) {
        Ok(f) => f,
        Err(e) => return SmtResolution::untranslatable(e.reason()),
    };
    let fp = fingerprint(&formula);

    if let Some(hit) = cache.get(&fp) {
        let model = hit
            .model
            .as_ref()
            .map(|m| rehydrate_model(m, &formula.decls));
        return SmtResolution {
            value: hit.value.clone(),
            model,
            fingerprint: Some(fp),
            cache_hit: true,
            cache_insert: None,
        };
    }

    match solver.solve(&formula, timeout) {
        // Refutation form: unsat of the negated goal proves the clause.
        SatOutcome::Unsat => SmtResolution {
            value: TriValue::Proved,
            model: None,
            fingerprint: Some(fp.clone()),
            cache_hit: false,
            cache_insert: Some((
                fp,
                CachedResult {
                    value: TriValue::Proved,
                    model: None,
                },
            )),
        },
        SatOutcome::Sat(model) => {
            let canonical = canonicalize_model(&model, &formula.decls);
            SmtResolution {
                value: TriValue::Disproved,
                model: Some(model),
                fingerprint: Some(fp.clone()),
                cache_hit: false,
                cache_insert: Some((
                    fp,
                    CachedResult {
                        value: TriValue::Disproved,
                        model: Some(canonical),
                    },
                )),
            }
        }
        // Indecisive answers are not cached: a later retry with relaxed
        // bounds must reach the solver again.
        SatOutcome::Unknown(msg) => {
            let reason = classify_solver_unknown(&msg);
            SmtResolution {
                value: TriValue::Unknown(reason),
                model: None,
                fingerprint: Some(fp),
                cache_hit: false,
                cache_insert: None,
            }
        }
    }
}

fn classify_solver_unknown(msg: &str) -> UnknownReason {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("canceled") {
        UnknownReason::Timeout
    } else if lower.contains("memout") || lower.contains("resource") {
        UnknownReason::ResourceExhausted
    } else {
        UnknownReason::SolverError(msg.to_string())
    }
}

/// Store model under canonical positional names.
fn canonicalize_model(model: &Bindings, decls: &[(String, Sort)]) -> Bindings {
    let mut out = Bindings::new();
    for (i, (name, _)) in decls.iter().enumerate() {
        if let Some(v) = model.get(name) {
            out.insert(format!("v{i}"), v.clone());
        }
    }
    out
}

/// Map a canonical cached model back onto the current formula's names.
fn rehydrate_model(canonical: &Bindings, decls: &[(String, Sort)]) -> Bindings {
    let mut out = Bindings::new();
    for (i, (name, _)) in decls.iter().enumerate() {
        if let Some(v) = canonical.get(&format!("v{i}")) {
            out.insert(name.clone(), v.clone());
        }
    }
    out
}
