#![forbid(unsafe_code)]

//! Clause data model: the checkable units of a behavior specification and
//! the contexts they are evaluated against.
//!
//! The specification language's parser lives outside this workspace; it
//! hands us clauses as expression trees with stable identifiers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use miette::SourceSpan;
use serde::{Deserialize, Serialize};

pub type Span = SourceSpan;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

fn default_span() -> Span {
    span(0, 0)
}

/// Kind of a checkable clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Precondition,
    Postcondition,
    Invariant,
    Temporal,
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClauseKind::Precondition => "precondition",
            ClauseKind::Postcondition => "postcondition",
            ClauseKind::Invariant => "invariant",
            ClauseKind::Temporal => "temporal",
        };
        f.write_str(s)
    }
}

/// Stable identifier for one clause: specification location plus kind.
///
/// Used as the aggregation key for evidence and as a component of SMT
/// cache keys, so it must stay stable across runs of the same spec.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClauseId {
    /// Specification location, e.g. `billing.spec:42`.
    pub location: String,
    pub kind: ClauseKind,
}

impl ClauseId {
    pub fn new(location: impl Into<String>, kind: ClauseKind) -> Self {
        Self {
            location: location.into(),
            kind,
        }
    }
}

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.location, self.kind)
    }
}

/// Severity attached to a clause by the specification author.
///
/// Penalty rules and blocker detection key off the clause's tags and
/// severity, not off the signal that produced the evidence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClauseMeta {
    #[serde(default)]
    pub severity: Severity,
    /// Free-form tags, e.g. `security`, `consistency`. Matched by penalty rules.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// A concrete runtime value bound to a specification variable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(xs) => {
                f.write_str("[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{x}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
    Implies,
}

impl BinOp {
    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Implies)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }
}

/// Quantifier over a domain of candidate bindings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quant {
    All,
    Any,
    None,
}

/// The domain a quantified variable ranges over.
///
/// Enumerated domains are folded by the evaluator; symbolic domains must be
/// discharged to the SMT stage, never sampled implicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantDomain {
    Enumerated(Vec<Value>),
    /// Named symbolic sort, e.g. `int`.
    Symbolic(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(skip, default = "default_span")]
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            span: default_span(),
            kind,
        }
    }

    /// Free variables in first-occurrence order.
    ///
    /// This order is load-bearing: the counterexample shrinker walks fields
    /// in declaration order so the same witness always shrinks the same way.
    pub fn free_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut bound = BTreeSet::new();
        collect_free_vars(self, &mut bound, &mut out);
        out
    }
}

fn collect_free_vars(expr: &Expr, bound: &mut BTreeSet<String>, out: &mut Vec<String>) {
    match &expr.kind {
        ExprKind::Lit(_) => {}
        ExprKind::Var(name) => {
            if !bound.contains(name) && !out.contains(name) {
                out.push(name.clone());
            }
        }
        ExprKind::Unary { expr, .. } => collect_free_vars(expr, bound, out),
        ExprKind::Binary { left, right, .. } => {
            collect_free_vars(left, bound, out);
            collect_free_vars(right, bound, out);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                collect_free_vars(a, bound, out);
            }
        }
        ExprKind::Quantified { var, body, .. } => {
            let fresh = bound.insert(var.clone());
            collect_free_vars(body, bound, out);
            if fresh {
                bound.remove(var);
            }
        }
        ExprKind::Count { var, body, .. } => {
            let fresh = bound.insert(var.clone());
            collect_free_vars(body, bound, out);
            if fresh {
                bound.remove(var);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Lit(Value),
    Var(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// Call to an externally-defined function. Opaque to the evaluator.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `all x in D: body`, `any x in D: body`, `none x in D: body`.
    Quantified {
        quant: Quant,
        var: String,
        domain: QuantDomain,
        body: Box<Expr>,
    },
    /// `count x in D: body` compared against `expected`.
    Count {
        var: String,
        domain: QuantDomain,
        body: Box<Expr>,
        op: BinOp,
        expected: Box<Expr>,
    },
}

/// Convenience constructors used heavily by tests and fixtures.
pub mod build {
    use super::*;

    pub fn lit(v: Value) -> Expr {
        Expr::new(ExprKind::Lit(v))
    }

    pub fn int(n: i64) -> Expr {
        lit(Value::Int(n))
    }

    pub fn boolean(b: bool) -> Expr {
        lit(Value::Bool(b))
    }

    pub fn var(name: &str) -> Expr {
        Expr::new(ExprKind::Var(name.to_string()))
    }

    pub fn unary(op: UnaryOp, e: Expr) -> Expr {
        Expr::new(ExprKind::Unary {
            op,
            expr: Box::new(e),
        })
    }

    pub fn not(e: Expr) -> Expr {
        unary(UnaryOp::Not, e)
    }

    pub fn bin(left: Expr, op: BinOp, right: Expr) -> Expr {
        Expr::new(ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Call {
            name: name.to_string(),
            args,
        })
    }

    pub fn quantified(quant: Quant, var: &str, domain: QuantDomain, body: Expr) -> Expr {
        Expr::new(ExprKind::Quantified {
            quant,
            var: var.to_string(),
            domain,
            body: Box::new(body),
        })
    }
}

/// One checkable clause: expression, declared preconditions, metadata.
///
/// Preconditions are carried separately from the body because mitigation
/// and shrinking must re-check them on every candidate witness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub id: ClauseId,
    #[serde(skip, default = "default_span")]
    pub span: Span,
    pub expr: Expr,
    #[serde(default)]
    pub preconditions: Vec<Expr>,
    #[serde(default)]
    pub meta: ClauseMeta,
}

impl Clause {
    pub fn new(id: ClauseId, expr: Expr) -> Self {
        Self {
            id,
            span: default_span(),
            expr,
            preconditions: Vec::new(),
            meta: ClauseMeta::default(),
        }
    }

    /// Free variables of the body and all preconditions, declaration order.
    pub fn free_vars(&self) -> Vec<String> {
        let mut out = self.expr.free_vars();
        for pre in &self.preconditions {
            for v in pre.free_vars() {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
        out
    }
}

pub type Bindings = BTreeMap<String, Value>;

/// Everything a clause is evaluated against: concrete bindings, the set of
/// variables that are symbolic (present but unconstrained), and recorded
/// concrete execution traces usable by runtime-sampling mitigation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvalContext {
    pub values: Bindings,
    pub symbolic: BTreeSet<String>,
    pub traces: Vec<Bindings>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn mark_symbolic(mut self, name: &str) -> Self {
        self.symbolic.insert(name.to_string());
        self
    }

    pub fn with_trace(mut self, trace: Bindings) -> Self {
        self.traces.push(trace);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_symbolic(&self, name: &str) -> bool {
        self.symbolic.contains(name)
    }

    /// A copy of this context with `overlay` bindings taking precedence.
    /// Overlaid variables stop being symbolic.
    pub fn overlaid(&self, overlay: &Bindings) -> EvalContext {
        let mut ctx = self.clone();
        for (k, v) in overlay {
            ctx.values.insert(k.clone(), v.clone());
            ctx.symbolic.remove(k);
        }
        ctx
    }
}

/// The clause registry for one verification run.
///
/// Evidence submissions referencing a clause id not present here are
/// rejected by the evidence store.
#[derive(Clone, Debug, Default)]
pub struct ClauseSet {
    clauses: BTreeMap<ClauseId, Clause>,
}

impl ClauseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, clause: Clause) {
        self.clauses.insert(clause.id.clone(), clause);
    }

    pub fn get(&self, id: &ClauseId) -> Option<&Clause> {
        self.clauses.get(id)
    }

    pub fn contains(&self, id: &ClauseId) -> bool {
        self.clauses.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ClauseId> {
        self.clauses.keys()
    }
}

impl FromIterator<Clause> for ClauseSet {
    fn from_iter<T: IntoIterator<Item = Clause>>(iter: T) -> Self {
        let mut set = ClauseSet::new();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    #[test]
    fn free_vars_are_declaration_ordered() {
        // b appears before a in the expression, so it comes first.
        let e = bin(var("b"), BinOp::Lt, bin(var("a"), BinOp::Add, var("b")));
        assert_eq!(e.free_vars(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn quantified_var_is_not_free() {
        let e = quantified(
            Quant::All,
            "x",
            QuantDomain::Symbolic("int".into()),
            bin(var("x"), BinOp::Le, var("cap")),
        );
        assert_eq!(e.free_vars(), vec!["cap".to_string()]);
    }

    #[test]
    fn clause_id_display_is_stable() {
        let id = ClauseId::new("billing.spec:42", ClauseKind::Postcondition);
        assert_eq!(id.to_string(), "billing.spec:42#postcondition");
    }

    #[test]
    fn clause_roundtrips_through_json() {
        let mut clause = Clause::new(
            ClauseId::new("acct.spec:7", ClauseKind::Invariant),
            bin(var("balance"), BinOp::Ge, int(0)),
        );
        clause.meta.tags.insert("security".to_string());
        let json = serde_json::to_string(&clause).unwrap();
        let back: Clause = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clause);
    }

    #[test]
    fn overlay_clears_symbolic_marking() {
        let ctx = EvalContext::new().mark_symbolic("x");
        let mut overlay = Bindings::new();
        overlay.insert("x".to_string(), Value::Int(3));
        let ctx2 = ctx.overlaid(&overlay);
        assert!(!ctx2.is_symbolic("x"));
        assert_eq!(ctx2.lookup("x"), Some(&Value::Int(3)));
    }
}
