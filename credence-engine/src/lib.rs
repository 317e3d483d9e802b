#![forbid(unsafe_code)]

//! Orchestration of a verification gate run.
//!
//! [`Engine`] holds the clause registry, the evidence store and the solver
//! cache across runs. One [`Engine::run`] resolves every clause in parallel
//! through the evaluate / solve / classify / mitigate / shrink pipeline,
//! merges the results under a single writer, and aggregates a verdict.

pub mod engine;
pub mod pipeline;

pub use engine::{Engine, EngineError, GateReport, SolverFactory};
pub use pipeline::{verify_clause, ClauseOutcome, StageBudget};
