#![forbid(unsafe_code)]

//! The append-only evidence store.
//!
//! Collaborators (static analyzers, the evaluator, the SMT stage, PBT and
//! chaos runners) submit records; malformed submissions are rejected with a
//! structured error, never silently dropped. Re-running a signal appends a
//! new record; the aggregator consumes the latest record per
//! (clause, signal) pair while the full history stays behind for audit.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use credence_clause::{ClauseId, ClauseSet};
use credence_verify::{Counterexample, TriValue};

/// Where a piece of evidence came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Static,
    Evaluator,
    Smt,
    Pbt,
    Chaos,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 5] = [
        SignalCategory::Static,
        SignalCategory::Evaluator,
        SignalCategory::Smt,
        SignalCategory::Pbt,
        SignalCategory::Chaos,
    ];
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalCategory::Static => "static",
            SignalCategory::Evaluator => "evaluator",
            SignalCategory::Smt => "smt",
            SignalCategory::Pbt => "pbt",
            SignalCategory::Chaos => "chaos",
        };
        f.write_str(s)
    }
}

/// How much the producing signal trusts its own verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(s)
    }
}

/// One evidence submission, the wire contract for collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub clause_id: ClauseId,
    pub category: SignalCategory,
    pub verdict: TriValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterexample: Option<Counterexample>,
    pub confidence: Confidence,
    /// Where the signal ran, e.g. `smt:z3` or `pbt:transfer_props.rs:88`.
    pub source: String,
    #[serde(default)]
    pub timestamp_ms: u64,
}

/// A stored record plus its store-assigned sequence number.
///
/// "Latest" is decided by sequence number, i.e. submission order, so that
/// aggregation is a pure function of what was submitted and not of
/// wall-clock skew between collaborators.
#[derive(Clone, Debug, PartialEq)]
pub struct Evidence {
    pub seq: u64,
    pub record: EvidenceRecord,
}

#[derive(Debug, Error, Diagnostic)]
pub enum SubmitError {
    #[error("evidence references unknown clause `{0}`")]
    #[diagnostic(code(credence::evidence::unknown_clause))]
    UnknownClause(ClauseId),

    #[error("counterexample attached to a non-disproved verdict for `{0}`")]
    #[diagnostic(code(credence::evidence::stray_counterexample))]
    StrayCounterexample(ClauseId),
}

/// Exclusively owned by the aggregator for the duration of one run.
#[derive(Clone, Debug, Default)]
pub struct EvidenceStore {
    known: BTreeSet<ClauseId>,
    records: Vec<Evidence>,
    next_seq: u64,
}

impl EvidenceStore {
    pub fn for_clauses(clauses: &ClauseSet) -> Self {
        Self {
            known: clauses.ids().cloned().collect(),
            records: Vec::new(),
            next_seq: 0,
        }
    }

    /// Append one record. Rejected records leave the store untouched;
    /// the run continues with the remaining valid evidence.
    pub fn submit(&mut self, record: EvidenceRecord) -> Result<u64, SubmitError> {
        if !self.known.contains(&record.clause_id) {
            return Err(SubmitError::UnknownClause(record.clause_id));
        }
        if record.counterexample.is_some() && !record.verdict.is_disproved() {
            return Err(SubmitError::StrayCounterexample(record.clause_id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push(Evidence { seq, record });
        Ok(seq)
    }

    /// Latest record per (clause, signal) pair.
    pub fn latest(&self) -> BTreeMap<(ClauseId, SignalCategory), &Evidence> {
        let mut out = BTreeMap::new();
        for ev in &self.records {
            // Records are stored in seq order; later entries overwrite.
            out.insert((ev.record.clause_id.clone(), ev.record.category), ev);
        }
        out
    }

    /// Full history for one clause, oldest first.
    pub fn history<'s>(&'s self, id: &'s ClauseId) -> impl Iterator<Item = &'s Evidence> + 's {
        self.records.iter().filter(move |e| &e.record.clause_id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Evidence> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn known_clauses(&self) -> impl Iterator<Item = &ClauseId> {
        self.known.iter()
    }
}
