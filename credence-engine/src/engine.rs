#![forbid(unsafe_code)]

//! Gate-run orchestration.
//!
//! Clauses resolve in parallel on a bounded worker pool; each worker reads
//! the shared solver cache and the evaluation environment but writes
//! nothing shared. The evidence store, the cache and the audit trail are
//! merged by this module alone after the parallel phase, in clause order,
//! so runs are reproducible.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use miette::Diagnostic;
use rayon::prelude::*;
use thiserror::Error;

use credence_clause::{Clause, ClauseSet, EvalContext};
use credence_report::{
    aggregate, AuditNote, AuditTrail, ConfigError, EvidenceRecord, EvidenceStore, RunConfig,
    Stage, SubmitError, Verdict,
};
use credence_verify::{BudgetGauge, SmtCache, Solve};

use crate::pipeline::{verify_clause, ClauseOutcome, StageBudget};

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    #[diagnostic(code(credence::engine::pool))]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Builds a fresh solver per worker; solvers are not shared across threads.
pub type SolverFactory<'f> = dyn Fn() -> Box<dyn Solve> + Sync + 'f;

/// Everything one gate run produced.
#[derive(Clone, Debug)]
pub struct GateReport {
    pub verdict: Verdict,
    pub outcomes: Vec<ClauseOutcome>,
    pub audit: Vec<AuditNote>,
    /// True when any clause hit the wall-clock or SMT-call budget.
    pub exhausted: bool,
}

/// Long-lived verification engine: clause registry, evidence store and
/// solver cache survive across runs, so re-gating after a partial fix
/// reuses every decisive solver result already paid for.
pub struct Engine {
    clauses: ClauseSet,
    config: RunConfig,
    store: EvidenceStore,
    cache: SmtCache,
    audit: AuditTrail,
}

impl Engine {
    pub fn new(clauses: ClauseSet, config: RunConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let store = EvidenceStore::for_clauses(&clauses);
        Ok(Self {
            clauses,
            config,
            store,
            cache: SmtCache::new(),
            audit: AuditTrail::new(),
        })
    }

    pub fn clauses(&self) -> &ClauseSet {
        &self.clauses
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop all cached solver results. Never implicit; stale entries are
    /// otherwise overwritten only by a newer result for the same formula.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Accept evidence from an external collaborator (static analyzer, PBT
    /// runner, chaos harness). Each record is validated independently;
    /// one bad record does not reject the batch.
    pub fn submit_evidence(
        &mut self,
        records: Vec<EvidenceRecord>,
    ) -> Vec<Result<u64, SubmitError>> {
        records
            .into_iter()
            .map(|r| {
                let id = r.clause_id.clone();
                let res = self.store.submit(r);
                match &res {
                    Ok(seq) => self.audit.record(
                        id,
                        Stage::Aggregate,
                        format!("external evidence accepted (seq {seq})"),
                    ),
                    Err(e) => self.audit.record(
                        id,
                        Stage::Aggregate,
                        format!("external evidence rejected: {e}"),
                    ),
                }
                res
            })
            .collect()
    }

    /// Resolve every registered clause against `env` and aggregate a
    /// verdict over all evidence collected so far, external included.
    pub fn run(
        &mut self,
        env: &EvalContext,
        make_solver: &SolverFactory<'_>,
    ) -> Result<GateReport, EngineError> {
        let budget = &self.config.budget;
        let gauge = BudgetGauge::new(
            Some(Instant::now() + Duration::from_millis(budget.pipeline_timeout_ms)),
            budget.smt_call_quota,
        );
        let stage_budget = StageBudget {
            solver_timeout: Duration::from_millis(budget.solver_timeout_ms),
            relaxed_solver_timeout: Duration::from_millis(budget.relaxed_solver_timeout_ms),
            max_shrink_steps: budget.max_shrink_steps,
            timestamp_ms: unix_millis(),
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(budget.workers)
            .build()?;

        let clauses: Vec<&Clause> = self.clauses.iter().collect();
        let cache = &self.cache;
        let outcomes: Vec<ClauseOutcome> = pool.install(|| {
            clauses
                .par_iter()
                .map(|clause| {
                    let mut solver = make_solver();
                    verify_clause(clause, env, solver.as_mut(), cache, &gauge, &stage_budget)
                })
                .collect()
        });

        // Single-writer merge, in clause order. Cache conflicts are
        // last-writer-wins; both writers hold a sound result for the same
        // canonical formula.
        let mut exhausted = false;
        for outcome in &outcomes {
            for (fp, cached) in &outcome.cache_inserts {
                self.cache.insert(fp.clone(), cached.clone());
            }
            for record in &outcome.evidence {
                // Pipeline records reference registered clauses; a failure
                // here is a bug, but it degrades to an audit note rather
                // than a panic.
                if let Err(e) = self.store.submit(record.clone()) {
                    self.audit.record(
                        outcome.clause_id.clone(),
                        Stage::Aggregate,
                        format!("evidence dropped: {e}"),
                    );
                }
            }
            for note in &outcome.audit {
                self.audit
                    .record(note.clause_id.clone(), note.stage, note.message.clone());
            }
            exhausted |= outcome.exhausted;
        }

        let verdict = aggregate(&self.store, &self.clauses, &self.config.score);
        Ok(GateReport {
            verdict,
            outcomes,
            audit: self.audit.drain(),
            exhausted,
        })
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
