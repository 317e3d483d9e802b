#![forbid(unsafe_code)]

//! Audit trail for one gate run.
//!
//! Each pipeline stage records what it did to which clause. Notes are held
//! in submission order and drained once at the end of the run for the
//! report; `for_clause` supports debugging a single clause in place.

use std::fmt;

use serde::{Deserialize, Serialize};

use credence_clause::ClauseId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Evaluate,
    Smt,
    Classify,
    Mitigate,
    Shrink,
    Aggregate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Evaluate => "evaluate",
            Stage::Smt => "smt",
            Stage::Classify => "classify",
            Stage::Mitigate => "mitigate",
            Stage::Shrink => "shrink",
            Stage::Aggregate => "aggregate",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditNote {
    pub clause_id: ClauseId,
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for AuditNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.clause_id, self.message)
    }
}

#[derive(Clone, Debug, Default)]
pub struct AuditTrail {
    notes: Vec<AuditNote>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, clause_id: ClauseId, stage: Stage, message: impl Into<String>) {
        self.notes.push(AuditNote {
            clause_id,
            stage,
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: AuditTrail) {
        self.notes.extend(other.notes);
    }

    pub fn drain(&mut self) -> Vec<AuditNote> {
        std::mem::take(&mut self.notes)
    }

    pub fn for_clause<'s>(&'s self, id: &'s ClauseId) -> impl Iterator<Item = &'s AuditNote> + 's {
        self.notes.iter().filter(move |n| &n.clause_id == id)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
