#![forbid(unsafe_code)]

//! The abstract solve interface.
//!
//! The core depends only on `Solve`; which backend sits behind it is an
//! explicit startup-time choice, never runtime reflection. `NoSolver` keeps
//! the workspace buildable on machines without libz3.

use std::collections::HashMap;
use std::time::Duration;

use credence_clause::{Bindings, Expr};

use crate::smt::Fingerprint;

/// SMT sorts the translation layer emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sort {
    Bool,
    Int,
}

/// Solver-native form of a residual constraint: declarations plus asserts.
///
/// The asserts are already in refutation form (preconditions plus negated
/// goal), fully concrete except for the declared symbolic variables, with
/// enumerated quantifiers expanded away.
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    /// Symbolic variables, first-occurrence order.
    pub decls: Vec<(String, Sort)>,
    pub asserts: Vec<Expr>,
}

/// What the solver said about a formula.
#[derive(Clone, Debug, PartialEq)]
pub enum SatOutcome {
    /// Satisfiable; the model binds every declared variable.
    Sat(Bindings),
    Unsat,
    /// `unknown`, timeout, or backend failure, with the backend's reason.
    Unknown(String),
}

pub trait Solve {
    fn solve(&mut self, formula: &Formula, timeout: Duration) -> SatOutcome;

    fn name(&self) -> &'static str;
}

/// Fallback backend when compiled without `--features credence-verify/z3`.
pub struct NoSolver;

impl Solve for NoSolver {
    fn solve(&mut self, _formula: &Formula, _timeout: Duration) -> SatOutcome {
        SatOutcome::Unknown(
            "no SMT backend enabled; rebuild with `--features credence-verify/z3`".to_string(),
        )
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Deterministic table-driven backend for tests and offline replays.
///
/// Answers are keyed by canonical fingerprint, so structurally identical
/// formulas (up to variable renaming) hit the same scripted answer. The
/// call counter lets tests assert that the cache avoided an invocation.
#[derive(Default)]
pub struct ScriptedSolver {
    answers: HashMap<Fingerprint, SatOutcome>,
    fallback: Option<SatOutcome>,
    pub calls: u32,
}

impl ScriptedSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, formula: &Formula, outcome: SatOutcome) -> Self {
        self.answers.insert(crate::smt::fingerprint(formula), outcome);
        self
    }

    pub fn respond_all(mut self, outcome: SatOutcome) -> Self {
        self.fallback = Some(outcome);
        self
    }
}

impl Solve for ScriptedSolver {
    fn solve(&mut self, formula: &Formula, _timeout: Duration) -> SatOutcome {
        self.calls += 1;
        let key = crate::smt::fingerprint(formula);
        self.answers
            .get(&key)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| SatOutcome::Unknown("no scripted answer".to_string()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(feature = "z3")]
pub mod z3_backend {
    use super::{Formula, SatOutcome, Solve, Sort};
    use credence_clause::{BinOp, Bindings, Expr, ExprKind, UnaryOp, Value};
    use std::collections::HashMap;
    use std::time::Duration;

    use z3::{
        ast::{Ast, Bool, Int},
        Config, Context, Params, SatResult, Solver,
    };

    pub struct Z3Solver {
        ctx: &'static Context,
    }

    impl Z3Solver {
        pub fn new() -> Self {
            let mut cfg = Config::new();
            cfg.set_model_generation(true);
            // Leak the Z3 context so the backend can be stored behind the
            // `Solve` trait without self-referential structs or unsafe code.
            // Acceptable for long-lived verification processes.
            let ctx: &'static Context = Box::leak(Box::new(Context::new(&cfg)));
            Self { ctx }
        }
    }

    impl Default for Z3Solver {
        fn default() -> Self {
            Self::new()
        }
    }

    enum Term<'c> {
        Int(Int<'c>),
        Bool(Bool<'c>),
    }

    struct Lowering<'c> {
        ctx: &'c Context,
        vars: HashMap<String, Term<'c>>,
    }

    impl<'c> Lowering<'c> {
        fn int(&mut self, expr: &Expr) -> Result<Int<'c>, String> {
            match self.term(expr)? {
                Term::Int(i) => Ok(i),
                Term::Bool(_) => Err("expected int term, found bool".to_string()),
            }
        }

        fn boolean(&mut self, expr: &Expr) -> Result<Bool<'c>, String> {
            match self.term(expr)? {
                Term::Bool(b) => Ok(b),
                Term::Int(_) => Err("expected bool term, found int".to_string()),
            }
        }

        fn term(&mut self, expr: &Expr) -> Result<Term<'c>, String> {
            match &expr.kind {
                ExprKind::Lit(Value::Int(n)) => Ok(Term::Int(Int::from_i64(self.ctx, *n))),
                ExprKind::Lit(Value::Bool(b)) => Ok(Term::Bool(Bool::from_bool(self.ctx, *b))),
                ExprKind::Lit(v) => Err(format!("unsupported literal sort {}", v.type_name())),
                ExprKind::Var(name) => match self.vars.get(name) {
                    Some(Term::Int(i)) => Ok(Term::Int(i.clone())),
                    Some(Term::Bool(b)) => Ok(Term::Bool(b.clone())),
                    None => Err(format!("undeclared variable `{name}`")),
                },
                ExprKind::Unary { op, expr } => match op {
                    UnaryOp::Neg => Ok(Term::Int(self.int(expr)?.unary_minus())),
                    UnaryOp::Not => Ok(Term::Bool(self.boolean(expr)?.not())),
                },
                ExprKind::Binary { left, op, right } => self.binary(left, *op, right),
                ExprKind::Call { name, .. } => Err(format!("opaque call `{name}`")),
                ExprKind::Quantified { .. } | ExprKind::Count { .. } => {
                    Err("residual quantifier reached the backend".to_string())
                }
            }
        }

        fn binary(&mut self, left: &Expr, op: BinOp, right: &Expr) -> Result<Term<'c>, String> {
            match op {
                BinOp::And => {
                    let l = self.boolean(left)?;
                    let r = self.boolean(right)?;
                    Ok(Term::Bool(Bool::and(self.ctx, &[&l, &r])))
                }
                BinOp::Or => {
                    let l = self.boolean(left)?;
                    let r = self.boolean(right)?;
                    Ok(Term::Bool(Bool::or(self.ctx, &[&l, &r])))
                }
                BinOp::Implies => {
                    let l = self.boolean(left)?;
                    let r = self.boolean(right)?;
                    Ok(Term::Bool(l.implies(&r)))
                }
                BinOp::Add => Ok(Term::Int(self.int(left)? + self.int(right)?)),
                BinOp::Sub => Ok(Term::Int(self.int(left)? - self.int(right)?)),
                BinOp::Mul => Ok(Term::Int(self.int(left)? * self.int(right)?)),
                BinOp::Div => Ok(Term::Int(self.int(left)?.div(&self.int(right)?))),
                BinOp::Rem => Ok(Term::Int(self.int(left)?.rem(&self.int(right)?))),
                BinOp::Eq => {
                    let l = self.term(left)?;
                    let r = self.term(right)?;
                    match (l, r) {
                        (Term::Int(a), Term::Int(b)) => Ok(Term::Bool(a._eq(&b))),
                        (Term::Bool(a), Term::Bool(b)) => Ok(Term::Bool(a._eq(&b))),
                        _ => Err("equality between mismatched sorts".to_string()),
                    }
                }
                BinOp::Ne => {
                    let eq = self.binary(left, BinOp::Eq, right)?;
                    match eq {
                        Term::Bool(b) => Ok(Term::Bool(b.not())),
                        Term::Int(_) => unreachable!("Eq lowers to bool"),
                    }
                }
                BinOp::Lt => Ok(Term::Bool(self.int(left)?.lt(&self.int(right)?))),
                BinOp::Le => Ok(Term::Bool(self.int(left)?.le(&self.int(right)?))),
                BinOp::Gt => Ok(Term::Bool(self.int(left)?.gt(&self.int(right)?))),
                BinOp::Ge => Ok(Term::Bool(self.int(left)?.ge(&self.int(right)?))),
            }
        }
    }

    impl Solve for Z3Solver {
        fn solve(&mut self, formula: &Formula, timeout: Duration) -> SatOutcome {
            let solver = Solver::new(self.ctx);
            let mut params = Params::new(self.ctx);
            params.set_u32("timeout", timeout.as_millis() as u32);
            solver.set_params(&params);

            let mut lowering = Lowering {
                ctx: self.ctx,
                vars: HashMap::new(),
            };
            for (name, sort) in &formula.decls {
                let term = match sort {
                    Sort::Int => Term::Int(Int::new_const(self.ctx, name.as_str())),
                    Sort::Bool => Term::Bool(Bool::new_const(self.ctx, name.as_str())),
                };
                lowering.vars.insert(name.clone(), term);
            }

            for assert in &formula.asserts {
                match lowering.boolean(assert) {
                    Ok(b) => solver.assert(&b),
                    Err(msg) => return SatOutcome::Unknown(msg),
                }
            }

            match solver.check() {
                SatResult::Unsat => SatOutcome::Unsat,
                SatResult::Unknown => SatOutcome::Unknown(
                    solver
                        .get_reason_unknown()
                        .unwrap_or_else(|| "unknown".to_string()),
                ),
                SatResult::Sat => {
                    let Some(model) = solver.get_model() else {
                        return SatOutcome::Unknown("sat without model".to_string());
                    };
                    let mut bindings = Bindings::new();
                    for (name, _) in &formula.decls {
                        let value = match lowering.vars.get(name) {
                            Some(Term::Int(i)) => model
                                .eval(i, true)
                                .and_then(|v| v.as_i64())
                                .map(Value::Int),
                            Some(Term::Bool(b)) => model
                                .eval(b, true)
                                .and_then(|v| v.as_bool())
                                .map(Value::Bool),
                            None => None,
                        };
                        if let Some(v) = value {
                            bindings.insert(name.clone(), v);
                        }
                    }
                    SatOutcome::Sat(bindings)
                }
            }
        }

        fn name(&self) -> &'static str {
            "z3"
        }
    }
}
