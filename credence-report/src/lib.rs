#![forbid(unsafe_code)]

//! Evidence aggregation and release verdicts.
//!
//! Collaborating signals (static analysis, the clause evaluator, SMT, PBT,
//! chaos runs) submit [`EvidenceRecord`]s into an append-only
//! [`EvidenceStore`]; [`verdict::aggregate`] folds the latest evidence per
//! (clause, signal) pair into a [`TrustScore`] and a Ship/Warn/NoShip
//! [`Verdict`].

pub mod audit;
pub mod config;
pub mod evidence;
pub mod score;
pub mod verdict;

pub use audit::{AuditNote, AuditTrail, Stage};
pub use config::{
    BudgetConfig, ConfigError, PenaltyRule, RunConfig, ScoreConfig, Thresholds,
    DEFAULT_SINGLE_SIGNAL_CAP, DEFAULT_UNKNOWN_PARTIAL_CREDIT,
};
pub use evidence::{
    Confidence, Evidence, EvidenceRecord, EvidenceStore, SignalCategory, SubmitError,
};
pub use score::{AppliedPenalty, SignalScore, TrustScore};
pub use verdict::{aggregate, Decision, Verdict};
