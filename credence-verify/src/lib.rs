#![forbid(unsafe_code)]

pub mod classify;
pub mod eval;
pub mod mitigate;
pub mod shrink;
pub mod smt;
pub mod solver;
pub mod trivalue;

pub use classify::{classify, Classification, MitigationStrategy, UnknownCategory};
pub use eval::{eval_clause, eval_expr, EvalOutcome, EvalTelemetry};
pub use mitigate::{mitigate, BudgetGauge, MitigationAttempt, MitigationConfig, MitigationOutcome};
pub use shrink::{shrink, Counterexample};
pub use smt::{fingerprint, resolve, CachedResult, Fingerprint, SmtCache, SmtResolution, TranslateError};
pub use solver::{Formula, NoSolver, SatOutcome, ScriptedSolver, Solve, Sort};
pub use trivalue::{TriValue, UnknownReason};
#[cfg(feature = "z3")]
pub use solver::z3_backend::Z3Solver;
