#![forbid(unsafe_code)]

//! Deterministic counterexample minimization.
//!
//! Delta-debugging over the failing witness: fields shrink in declaration
//! order, a candidate is accepted only if the clause still fails and every
//! declared precondition still holds, and passes repeat until a full pass
//! accepts nothing (local minimum) or the step budget runs out. The same
//! witness therefore always shrinks to the same minimal counterexample.

use serde::{Deserialize, Serialize};

use credence_clause::{Bindings, Clause, EvalContext, Value};

use crate::eval::eval_expr;
use crate::trivalue::TriValue;

/// A minimized (or budget-limited) failing input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Counterexample {
    /// Failing bindings in the clause's declaration order.
    pub inputs: Vec<(String, Value)>,
    /// Accepted reduction steps taken from the raw witness.
    pub shrink_steps: u32,
    /// True when a full pass found no further accepted reduction.
    pub minimal: bool,
}

impl Counterexample {
    /// Wrap a witness without shrinking (e.g. solver models, which are
    /// already small, or externally submitted failures).
    pub fn raw(clause: &Clause, witness: &Bindings) -> Counterexample {
        Counterexample {
            inputs: ordered_inputs(clause, witness),
            shrink_steps: 0,
            minimal: false,
        }
    }

    pub fn summary(&self) -> String {
        let fields = self
            .inputs
            .iter()
            .map(|(k, v)| format!("{k} = {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{{{fields}}} ({} shrink steps{})",
            self.shrink_steps,
            if self.minimal { ", minimal" } else { "" }
        )
    }
}

/// Shrink `witness` against `clause`, re-checking failure and preconditions
/// on every candidate.
pub fn shrink(
    clause: &Clause,
    ctx: &EvalContext,
    witness: &Bindings,
    max_steps: u32,
) -> Counterexample {
    let order: Vec<String> = clause
        .free_vars()
        .into_iter()
        .filter(|name| witness.contains_key(name))
        .collect();

    let mut current = witness.clone();
    let mut steps = 0u32;
    let mut minimal = false;

    if !still_fails(clause, ctx, &current) {
        // The witness does not reproduce under re-evaluation; report it
        // unshrank rather than minimize a non-failure.
        return Counterexample::raw(clause, witness);
    }

    'passes: loop {
        let mut accepted_this_pass = false;
        for name in &order {
            let value = current.get(name).cloned().expect("ordered from witness");
            for candidate_value in shrink_candidates(&value) {
                if steps >= max_steps {
                    break 'passes;
                }
                let mut candidate = current.clone();
                candidate.insert(name.clone(), candidate_value.clone());
                if still_fails(clause, ctx, &candidate) {
                    current = candidate;
                    steps += 1;
                    accepted_this_pass = true;
                    // Restart this field's candidates from the new value.
                    break;
                }
            }
        }
        if !accepted_this_pass {
            minimal = true;
            break;
        }
    }

    Counterexample {
        inputs: order
            .iter()
            .map(|name| (name.clone(), current.get(name).cloned().expect("present")))
            .collect(),
        shrink_steps: steps,
        minimal,
    }
}

/// Candidate still fails the clause AND satisfies every precondition.
/// Preconditions must be Proved outright; Unknown is not good enough to
/// accept a reduction.
fn still_fails(clause: &Clause, ctx: &EvalContext, candidate: &Bindings) -> bool {
    let replayed = ctx.overlaid(candidate);
    for pre in &clause.preconditions {
        if eval_expr(pre, &replayed) != TriValue::Proved {
            return false;
        }
    }
    eval_expr(&clause.expr, &replayed) == TriValue::Disproved
}

/// Reduction candidates for one value, most aggressive first.
fn shrink_candidates(value: &Value) -> Vec<Value> {
    match value {
        Value::Int(0) => Vec::new(),
        Value::Int(n) => {
            let mut out = vec![Value::Int(0)];
            let half = n / 2;
            if half != 0 && half != *n {
                out.push(Value::Int(half));
            }
            let step = n - n.signum();
            if step != half {
                out.push(Value::Int(step));
            }
            out
        }
        Value::Bool(true) => vec![Value::Bool(false)],
        Value::Bool(false) => Vec::new(),
        Value::Str(s) if s.is_empty() => Vec::new(),
        Value::Str(s) => {
            let mut out = vec![Value::Str(String::new())];
            let half: String = s.chars().take(s.chars().count() / 2).collect();
            if !half.is_empty() {
                out.push(Value::Str(half));
            }
            let shorter: String = {
                let mut chars: Vec<char> = s.chars().collect();
                chars.pop();
                chars.into_iter().collect()
            };
            if !shorter.is_empty() && shorter.len() != s.chars().count() / 2 {
                out.push(Value::Str(shorter));
            }
            out
        }
        Value::List(xs) if xs.is_empty() => Vec::new(),
        Value::List(xs) => {
            let mut out = vec![Value::List(Vec::new())];
            let half = xs[..xs.len() / 2].to_vec();
            if !half.is_empty() {
                out.push(Value::List(half));
            }
            let mut shorter = xs.clone();
            shorter.pop();
            if !shorter.is_empty() && shorter.len() != xs.len() / 2 {
                out.push(Value::List(shorter));
            }
            out
        }
    }
}

fn ordered_inputs(clause: &Clause, witness: &Bindings) -> Vec<(String, Value)> {
    clause
        .free_vars()
        .into_iter()
        .filter_map(|name| witness.get(&name).map(|v| (name.clone(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use credence_clause::build::*;
    use credence_clause::{BinOp, ClauseId, ClauseKind, Expr};

    fn clause(expr: Expr) -> Clause {
        Clause::new(ClauseId::new("t.spec:1", ClauseKind::Postcondition), expr)
    }

    fn bindings(pairs: &[(&str, i64)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Int(*v)))
            .collect()
    }

    #[test]
    fn shrinks_toward_zero_while_still_failing() {
        // x < 100 fails for any x >= 100; minimal failing value is 100.
        let c = clause(bin(var("x"), BinOp::Lt, int(100)));
        let witness = bindings(&[("x", 7420)]);
        let ce = shrink(&c, &EvalContext::new(), &witness, 1000);
        assert!(ce.minimal);
        assert_eq!(ce.inputs, vec![("x".to_string(), Value::Int(100))]);
        assert!(ce.shrink_steps > 0);
    }

    #[test]
    fn preconditions_bound_the_shrink() {
        // pre: x >= 500. Shrinking below 500 would fail the precondition.
        let mut c = clause(bin(var("x"), BinOp::Lt, int(100)));
        c.preconditions.push(bin(var("x"), BinOp::Ge, int(500)));
        let witness = bindings(&[("x", 9000)]);
        let ce = shrink(&c, &EvalContext::new(), &witness, 1000);
        assert!(ce.minimal);
        assert_eq!(ce.inputs, vec![("x".to_string(), Value::Int(500))]);
    }

    #[test]
    fn shrinking_is_deterministic() {
        let c = clause(bin(
            bin(var("a"), BinOp::Add, var("b")),
            BinOp::Lt,
            int(10),
        ));
        let witness = bindings(&[("a", 123), ("b", 456)]);
        let first = shrink(&c, &EvalContext::new(), &witness, 1000);
        let second = shrink(&c, &EvalContext::new(), &witness, 1000);
        assert_eq!(first, second);
        assert!(first.minimal);
    }

    #[test]
    fn minimal_witness_still_fails_and_meets_preconditions() {
        let mut c = clause(bin(
            bin(var("a"), BinOp::Add, var("b")),
            BinOp::Lt,
            int(10),
        ));
        c.preconditions.push(bin(var("a"), BinOp::Ge, int(0)));
        c.preconditions.push(bin(var("b"), BinOp::Ge, int(0)));
        let witness = bindings(&[("a", 80), ("b", 33)]);
        let ce = shrink(&c, &EvalContext::new(), &witness, 1000);

        let shrunk: Bindings = ce.inputs.iter().cloned().collect();
        assert!(still_fails(&c, &EvalContext::new(), &shrunk));
        // No single further step improves it.
        for (name, value) in &ce.inputs {
            for cand in shrink_candidates(value) {
                let mut attempt = shrunk.clone();
                attempt.insert(name.clone(), cand);
                assert!(
                    !still_fails(&c, &EvalContext::new(), &attempt),
                    "found a smaller failing witness from {name}"
                );
            }
        }
    }

    #[test]
    fn step_budget_marks_result_non_minimal() {
        let c = clause(bin(var("x"), BinOp::Lt, int(100)));
        let witness = bindings(&[("x", i64::MAX / 2)]);
        let ce = shrink(&c, &EvalContext::new(), &witness, 1);
        assert!(!ce.minimal);
        assert_eq!(ce.shrink_steps, 1);
    }

    #[test]
    fn non_reproducing_witness_is_returned_raw() {
        let c = clause(bin(var("x"), BinOp::Lt, int(100)));
        let witness = bindings(&[("x", 5)]); // does not fail the clause
        let ce = shrink(&c, &EvalContext::new(), &witness, 1000);
        assert!(!ce.minimal);
        assert_eq!(ce.shrink_steps, 0);
        assert_eq!(ce.inputs, vec![("x".to_string(), Value::Int(5))]);
    }

    #[test]
    fn strings_shrink_toward_empty() {
        let c = clause(bin(var("s"), BinOp::Eq, lit(Value::Str(String::new()))));
        let mut witness = Bindings::new();
        witness.insert("s".to_string(), Value::Str("abcdef".to_string()));
        let ce = shrink(&c, &EvalContext::new(), &witness, 1000);
        assert!(ce.minimal);
        // Any non-empty string fails `s == ""`; minimal is a single char.
        match &ce.inputs[0].1 {
            Value::Str(s) => assert_eq!(s.chars().count(), 1),
            other => panic!("expected string, got {other:?}"),
        }
    }
}
