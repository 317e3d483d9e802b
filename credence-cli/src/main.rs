#![forbid(unsafe_code)]

use std::{fs, path::Path, path::PathBuf};

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Deserialize;

use credence_clause::{Bindings, Clause, ClauseSet, EvalContext};
use credence_engine::Engine;
use credence_report::{EvidenceRecord, RunConfig};
use credence_verify::Solve;

#[derive(Parser, Debug)]
#[command(name = "credence", version, about = "Evidence-aggregation release gate")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Resolve all clauses, aggregate evidence, decide ship/warn/no-ship
    Gate {
        /// Clause registry (JSON array of clauses)
        #[arg(long, default_value = "clauses.json")]
        clauses: PathBuf,

        /// Evaluation environment: bindings, symbolic variables, traces (JSON)
        #[arg(long)]
        env: Option<PathBuf>,

        /// Score and budget configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// External evidence batch (JSON array of records; repeatable)
        #[arg(long)]
        evidence: Vec<PathBuf>,

        /// Write the full verdict as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the verdict as JSON on stdout instead of the text report
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Treat a warn verdict as a failure
        #[arg(long, default_value_t = false)]
        fail_on_warn: bool,

        /// Print the per-clause audit trail
        #[arg(long, default_value_t = false)]
        audit: bool,
    },

    /// Resolve a single clause and print its verdict and counterexample
    Resolve {
        /// Clause registry (JSON array of clauses)
        #[arg(long, default_value = "clauses.json")]
        clauses: PathBuf,

        /// Clause to resolve, as `location#kind` (e.g. `pay.spec:3#invariant`)
        clause: String,

        /// Evaluation environment (JSON)
        #[arg(long)]
        env: Option<PathBuf>,

        /// Score and budget configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// On-disk shape of the `--env` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvFile {
    values: Bindings,
    symbolic: Vec<String>,
    traces: Vec<Bindings>,
}

impl EnvFile {
    fn into_context(self) -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.values = self.values;
        ctx.symbolic = self.symbolic.into_iter().collect();
        ctx.traces = self.traces;
        ctx
    }
}

fn load_clauses(path: &Path) -> miette::Result<ClauseSet> {
    let raw = fs::read_to_string(path).into_diagnostic()?;
    let list: Vec<Clause> = serde_json::from_str(&raw)
        .map_err(|e| miette::miette!("{}: invalid clause file: {e}", path.display()))?;
    Ok(list.into_iter().collect())
}

fn load_env(path: Option<&Path>) -> miette::Result<EvalContext> {
    let Some(path) = path else {
        return Ok(EvalContext::new());
    };
    let raw = fs::read_to_string(path).into_diagnostic()?;
    let file: EnvFile = serde_json::from_str(&raw)
        .map_err(|e| miette::miette!("{}: invalid environment file: {e}", path.display()))?;
    Ok(file.into_context())
}

fn load_config(path: Option<&Path>) -> miette::Result<RunConfig> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let raw = fs::read_to_string(path).into_diagnostic()?;
    RunConfig::from_toml_str(&raw).map_err(miette::Report::new)
}

fn load_evidence(paths: &[PathBuf]) -> miette::Result<Vec<EvidenceRecord>> {
    let mut out = Vec::new();
    for path in paths {
        let raw = fs::read_to_string(path).into_diagnostic()?;
        let batch: Vec<EvidenceRecord> = serde_json::from_str(&raw)
            .map_err(|e| miette::miette!("{}: invalid evidence file: {e}", path.display()))?;
        out.extend(batch);
    }
    Ok(out)
}

#[cfg(feature = "z3")]
fn make_solver() -> Box<dyn Solve> {
    Box::new(credence_verify::Z3Solver::new())
}

#[cfg(not(feature = "z3"))]
fn make_solver() -> Box<dyn Solve> {
    Box::new(credence_verify::NoSolver)
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Gate {
            clauses,
            env,
            config,
            evidence,
            report,
            json,
            fail_on_warn,
            audit,
        } => {
            let set = load_clauses(&clauses)?;
            let ctx = load_env(env.as_deref())?;
            let cfg = load_config(config.as_deref())?;
            let external = load_evidence(&evidence)?;

            let mut engine = Engine::new(set, cfg).map_err(miette::Report::new)?;
            let mut rejected = 0usize;
            for res in engine.submit_evidence(external) {
                if let Err(e) = res {
                    eprintln!("evidence rejected: {e}");
                    rejected += 1;
                }
            }
            if rejected > 0 {
                eprintln!("{rejected} evidence record(s) rejected");
            }

            let gate = engine
                .run(&ctx, &make_solver)
                .map_err(miette::Report::new)?;

            if let Some(out) = &report {
                let body =
                    serde_json::to_string_pretty(&gate.verdict).into_diagnostic()?;
                fs::write(out, body).into_diagnostic()?;
            }
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&gate.verdict).into_diagnostic()?
                );
            } else {
                print!("{}", gate.verdict.render());
            }
            if audit {
                for note in &gate.audit {
                    eprintln!("{note}");
                }
            }
            if gate.exhausted {
                eprintln!("warning: resource budget exhausted; some clauses degraded to unknown");
            }

            match gate.verdict.decision {
                credence_report::Decision::Ship => Ok(()),
                credence_report::Decision::Warn if !fail_on_warn => Ok(()),
                credence_report::Decision::Warn => {
                    Err(miette::miette!("verdict is warn and --fail-on-warn is set"))
                }
                credence_report::Decision::NoShip => {
                    Err(miette::miette!("release blocked: verdict is no-ship"))
                }
            }
        }

        Cmd::Resolve {
            clauses,
            clause,
            env,
            config,
        } => {
            let set = load_clauses(&clauses)?;
            let target = set
                .iter()
                .find(|c| c.id.to_string() == clause)
                .cloned()
                .ok_or_else(|| {
                    let known = set
                        .ids()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    miette::miette!("no clause `{clause}` in registry (known: {known})")
                })?;
            let ctx = load_env(env.as_deref())?;
            let cfg = load_config(config.as_deref())?;

            let single: ClauseSet = [target].into_iter().collect();
            let mut engine = Engine::new(single, cfg).map_err(miette::Report::new)?;
            let gate = engine
                .run(&ctx, &make_solver)
                .map_err(miette::Report::new)?;

            let outcome = &gate.outcomes[0];
            println!("{}: {}", outcome.clause_id, outcome.value);
            if let Some(cx) = &outcome.counterexample {
                println!("counterexample: {}", cx.summary());
            }
            for note in &gate.audit {
                println!("{note}");
            }

            if outcome.value.is_disproved() {
                return Err(miette::miette!("clause disproved"));
            }
            Ok(())
        }
    }
}
