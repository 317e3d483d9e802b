#![forbid(unsafe_code)]

//! Clause evaluation: structural recursion over the expression tree,
//! applying the tri-state algebra.
//!
//! Evaluation is referentially transparent: the same clause and context
//! always produce the same `TriValue`, so results can be retried and cached
//! freely. Anything the interpreter cannot decide comes back as Unknown
//! with the sharpest reason available, never a guess.

use std::time::Instant;

use credence_clause::{BinOp, Bindings, Clause, EvalContext, Expr, ExprKind, Quant, QuantDomain, UnaryOp, Value};

use crate::trivalue::{TriValue, UnknownReason};

/// Measurements taken during one evaluation, consumed by the classifier.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvalTelemetry {
    pub elapsed_ms: u64,
    pub node_count: u32,
    pub max_depth: u32,
    /// Variables referenced by the clause but absent from the context and
    /// not marked symbolic. These signal missing runtime evidence.
    pub unbound_vars: Vec<String>,
}

/// Result of evaluating one clause against a context.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalOutcome {
    pub value: TriValue,
    /// Raw (pre-shrink) falsifying bindings, when the clause was disproved
    /// via fully concrete evaluation.
    pub witness: Option<Bindings>,
    pub telemetry: EvalTelemetry,
}

/// Evaluate a full clause: preconditions imply body.
pub fn eval_clause(clause: &Clause, ctx: &EvalContext) -> EvalOutcome {
    let start = Instant::now();
    let mut state = EvalState::default();

    let pre = TriValue::all(
        clause
            .preconditions
            .iter()
            .map(|p| eval_bool(p, ctx, &mut state, 1)),
    );
    let body = eval_bool(&clause.expr, ctx, &mut state, 1);
    let value = pre.implies(body);

    let witness = if value.is_disproved() {
        concrete_bindings(clause, ctx)
    } else {
        None
    };

    EvalOutcome {
        value,
        witness,
        telemetry: EvalTelemetry {
            elapsed_ms: start.elapsed().as_millis() as u64,
            node_count: state.node_count,
            max_depth: state.max_depth,
            unbound_vars: state.unbound_vars,
        },
    }
}

/// Evaluate a bare expression in truth position.
pub fn eval_expr(expr: &Expr, ctx: &EvalContext) -> TriValue {
    let mut state = EvalState::default();
    eval_bool(expr, ctx, &mut state, 1)
}

/// The clause's free variables with their concrete values, when every one
/// of them is concretely bound. A partial witness is useless for shrinking.
fn concrete_bindings(clause: &Clause, ctx: &EvalContext) -> Option<Bindings> {
    let mut out = Bindings::new();
    for name in clause.free_vars() {
        match ctx.lookup(&name) {
            Some(v) => {
                out.insert(name, v.clone());
            }
            None => return None,
        }
    }
    Some(out)
}

#[derive(Default)]
struct EvalState {
    node_count: u32,
    max_depth: u32,
    unbound_vars: Vec<String>,
}

impl EvalState {
    fn visit(&mut self, depth: u32) {
        self.node_count += 1;
        if depth > self.max_depth {
            self.max_depth = depth;
        }
    }

    fn record_unbound(&mut self, name: &str) {
        if !self.unbound_vars.iter().any(|v| v == name) {
            self.unbound_vars.push(name.to_string());
        }
    }
}

fn eval_bool(expr: &Expr, ctx: &EvalContext, state: &mut EvalState, depth: u32) -> TriValue {
    state.visit(depth);
    match &expr.kind {
        ExprKind::Lit(Value::Bool(b)) => TriValue::from_bool(*b),
        ExprKind::Lit(v) => TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
            "{} literal in truth position",
            v.type_name()
        ))),
        ExprKind::Var(name) => match ctx.lookup(name) {
            Some(Value::Bool(b)) => TriValue::from_bool(*b),
            Some(v) => TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
                "variable `{name}` has type {}, expected bool",
                v.type_name()
            ))),
            None if ctx.is_symbolic(name) => TriValue::Unknown(UnknownReason::TheoryIncomplete),
            None => {
                state.record_unbound(name);
                TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
                    "unbound variable `{name}`"
                )))
            }
        },
        ExprKind::Unary { op, expr } => match op {
            UnaryOp::Not => eval_bool(expr, ctx, state, depth + 1).not(),
            UnaryOp::Neg => TriValue::Unknown(UnknownReason::UnsupportedFeature(
                "numeric negation in truth position".to_string(),
            )),
        },
        ExprKind::Binary { left, op, right } => match op {
            // Disproved short-circuits AND; the right operand is still the
            // algebra's AND, so Unknown is never dropped.
            BinOp::And => {
                let l = eval_bool(left, ctx, state, depth + 1);
                if l.is_disproved() {
                    return TriValue::Disproved;
                }
                l.and(eval_bool(right, ctx, state, depth + 1))
            }
            BinOp::Or => {
                let l = eval_bool(left, ctx, state, depth + 1);
                if l.is_proved() {
                    return TriValue::Proved;
                }
                l.or(eval_bool(right, ctx, state, depth + 1))
            }
            BinOp::Implies => {
                let l = eval_bool(left, ctx, state, depth + 1);
                if l.is_disproved() {
                    return TriValue::Proved;
                }
                l.implies(eval_bool(right, ctx, state, depth + 1))
            }
            op if op.is_comparison() => {
                let l = eval_term(left, ctx, state, depth + 1);
                let r = eval_term(right, ctx, state, depth + 1);
                match (l, r) {
                    (Ok(lv), Ok(rv)) => compare(&lv, *op, &rv),
                    (Err(e), Ok(_)) | (Ok(_), Err(e)) => TriValue::Unknown(e),
                    (Err(e1), Err(e2)) => TriValue::Unknown(e1.combine(e2)),
                }
            }
            op => TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
                "arithmetic operator {op:?} in truth position"
            ))),
        },
        ExprKind::Call { name, .. } => {
            // Externally-opaque function: no interpreter, no guessing.
            TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
                "opaque call `{name}`"
            )))
        }
        ExprKind::Quantified {
            quant,
            var,
            domain,
            body,
        } => match domain {
            QuantDomain::Enumerated(elems) => {
                let folded = elems.iter().map(|elem| {
                    let scoped = scope(ctx, var, elem);
                    eval_bool(body, &scoped, state, depth + 1)
                });
                match quant {
                    Quant::All => TriValue::all(folded),
                    Quant::Any => TriValue::any(folded),
                    Quant::None => TriValue::none(folded),
                }
            }
            // Unbounded domains are discharged to the SMT stage, never
            // silently sampled.
            QuantDomain::Symbolic(_) => TriValue::Unknown(UnknownReason::QuantifierInstantiation),
        },
        ExprKind::Count {
            var,
            domain,
            body,
            op,
            expected,
        } => match domain {
            QuantDomain::Enumerated(elems) => {
                eval_count(elems, var, body, *op, expected, ctx, state, depth)
            }
            QuantDomain::Symbolic(_) => TriValue::Unknown(UnknownReason::QuantifierInstantiation),
        },
    }
}

/// `COUNT x in D: body <op> expected` over an enumerated domain.
///
/// Unknown body results make the count an interval `[proved, proved+unknown]`;
/// the comparison is decided only when the whole interval agrees.
#[allow(clippy::too_many_arguments)]
fn eval_count(
    elems: &[Value],
    var: &str,
    body: &Expr,
    op: BinOp,
    expected: &Expr,
    ctx: &EvalContext,
    state: &mut EvalState,
    depth: u32,
) -> TriValue {
    if !op.is_comparison() {
        return TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
            "count comparison operator {op:?}"
        )));
    }
    let expected = match eval_term(expected, ctx, state, depth + 1) {
        Ok(Value::Int(n)) => n,
        Ok(v) => {
            return TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
                "count expected a numeric bound, got {}",
                v.type_name()
            )));
        }
        Err(e) => return TriValue::Unknown(e),
    };

    let mut proved: i64 = 0;
    let mut unknown: i64 = 0;
    let mut pending: Option<UnknownReason> = None;
    for elem in elems {
        let scoped = scope(ctx, var, elem);
        match eval_bool(body, &scoped, state, depth + 1) {
            TriValue::Proved => proved += 1,
            TriValue::Disproved => {}
            TriValue::Unknown(r) => {
                unknown += 1;
                pending = Some(match pending.take() {
                    Some(prev) => prev.combine(r),
                    None => r,
                });
            }
        }
    }

    let lo = proved;
    let hi = proved + unknown;
    let holds_at = |count: i64| -> bool {
        match op {
            BinOp::Eq => count == expected,
            BinOp::Ne => count != expected,
            BinOp::Lt => count < expected,
            BinOp::Le => count <= expected,
            BinOp::Gt => count > expected,
            BinOp::Ge => count >= expected,
            _ => unreachable!("guarded above"),
        }
    };

    let all_hold = (lo..=hi).all(holds_at);
    let none_hold = (lo..=hi).all(|c| !holds_at(c));
    if all_hold {
        TriValue::Proved
    } else if none_hold {
        TriValue::Disproved
    } else {
        TriValue::Unknown(pending.unwrap_or(UnknownReason::TheoryIncomplete))
    }
}

fn scope(ctx: &EvalContext, var: &str, value: &Value) -> EvalContext {
    let mut scoped = ctx.clone();
    scoped.values.insert(var.to_string(), value.clone());
    scoped.symbolic.remove(var);
    scoped
}

/// Evaluate an expression in value position. `Err` carries the reason the
/// term stayed symbolic or uninterpretable.
fn eval_term(
    expr: &Expr,
    ctx: &EvalContext,
    state: &mut EvalState,
    depth: u32,
) -> Result<Value, UnknownReason> {
    state.visit(depth);
    match &expr.kind {
        ExprKind::Lit(v) => Ok(v.clone()),
        ExprKind::Var(name) => match ctx.lookup(name) {
            Some(v) => Ok(v.clone()),
            None if ctx.is_symbolic(name) => Err(UnknownReason::TheoryIncomplete),
            None => {
                state.record_unbound(name);
                Err(UnknownReason::UnsupportedFeature(format!(
                    "unbound variable `{name}`"
                )))
            }
        },
        ExprKind::Unary { op, expr } => match op {
            UnaryOp::Neg => match eval_term(expr, ctx, state, depth + 1)? {
                Value::Int(n) => Ok(Value::Int(-n)),
                v => Err(UnknownReason::UnsupportedFeature(format!(
                    "negation of {}",
                    v.type_name()
                ))),
            },
            UnaryOp::Not => Err(UnknownReason::UnsupportedFeature(
                "logical not in value position".to_string(),
            )),
        },
        ExprKind::Binary { left, op, right } => {
            let l = eval_term(left, ctx, state, depth + 1);
            let r = eval_term(right, ctx, state, depth + 1);
            match (l, r) {
                (Ok(lv), Ok(rv)) => apply_arith(&lv, *op, &rv),
                // Products/quotients of two symbolic terms leave the linear
                // fragment; everything else stays a linear obstacle.
                (Err(e1), Err(e2)) => {
                    if matches!(op, BinOp::Mul | BinOp::Div | BinOp::Rem)
                        && e1 == UnknownReason::TheoryIncomplete
                        && e2 == UnknownReason::TheoryIncomplete
                    {
                        Err(UnknownReason::NonlinearArithmetic)
                    } else {
                        Err(e1.combine(e2))
                    }
                }
                (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            }
        }
        ExprKind::Call { name, .. } => Err(UnknownReason::UnsupportedFeature(format!(
            "opaque call `{name}`"
        ))),
        ExprKind::Quantified { .. } | ExprKind::Count { .. } => Err(
            UnknownReason::UnsupportedFeature("quantifier in value position".to_string()),
        ),
    }
}

fn apply_arith(l: &Value, op: BinOp, r: &Value) -> Result<Value, UnknownReason> {
    let (a, b) = match (l, r) {
        (Value::Int(a), Value::Int(b)) => (*a, *b),
        _ => {
            return Err(UnknownReason::UnsupportedFeature(format!(
                "arithmetic on {} and {}",
                l.type_name(),
                r.type_name()
            )));
        }
    };
    match op {
        BinOp::Add => Ok(Value::Int(a.wrapping_add(b))),
        BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
        BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
        BinOp::Div => {
            if b == 0 {
                Err(UnknownReason::UnsupportedFeature("division by zero".to_string()))
            } else {
                Ok(Value::Int(a.wrapping_div(b)))
            }
        }
        BinOp::Rem => {
            if b == 0 {
                Err(UnknownReason::UnsupportedFeature("remainder by zero".to_string()))
            } else {
                Ok(Value::Int(a.wrapping_rem(b)))
            }
        }
        _ => Err(UnknownReason::UnsupportedFeature(format!(
            "operator {op:?} in value position"
        ))),
    }
}

fn compare(l: &Value, op: BinOp, r: &Value) -> TriValue {
    let result = match op {
        BinOp::Eq => Some(l == r),
        BinOp::Ne => Some(l != r),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Some(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                _ => unreachable!(),
            }),
            (Value::Str(a), Value::Str(b)) => Some(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                _ => unreachable!(),
            }),
            _ => None,
        },
        _ => None,
    };
    match result {
        Some(b) => TriValue::from_bool(b),
        None => TriValue::Unknown(UnknownReason::UnsupportedFeature(format!(
            "comparison {op:?} between {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}
