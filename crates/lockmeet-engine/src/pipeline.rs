#![allow(clippy::result_large_err)]

use std::time::Instant;

use indexmap::IndexMap;
use miette::Diagnostic;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use lockmeet_dsl::ast;
use lockmeet_dsl::errors::ParseError;
use lockmeet_ir::clustering::{
    BoundedClusters, ClusterTable, ClusteringError, ClusteringPolicy, SingletonClusters,
};
use lockmeet_ir::domain::{Constant, Interval, ValueDomain};
use lockmeet_ir::lowering::{self, LoweringError, SpannedLoweringError};
use lockmeet_ir::program::{Multiplicity, ThreadId, ThreadedProgram};

use crate::privatization::{PathSensitivity, Privatizer, ReplayOutcome};
use crate::query::Verdict;
use crate::relation::ClusterLayout;
use crate::result::{
    AnalysisReport, ClusterSummary, DiagnosticKind, GlobalValue, ProtocolDiagnostic,
};
use crate::store::{ProtectedStore, UpdateMode};

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
    #[error("Lowering error: {0}")]
    Lowering(#[from] LoweringError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    SpannedLowering(#[from] SpannedLoweringError),
    #[error("Clustering error: {0}")]
    Clustering(#[from] ClusteringError),
    #[error("Invalid value '{value}' for option '{key}': {reason}")]
    #[diagnostic(code(lockmeet::options))]
    Options {
        key: String,
        value: String,
        reason: String,
    },
    #[error("Replay worker failed: {0}")]
    Worker(String),
}

/// Which clustering policy partitions the mutexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringChoice {
    Singleton,
    #[default]
    Bounded,
}

/// Which value domain the engine is instantiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainChoice {
    #[default]
    Interval,
    Constant,
}

/// Options for the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisOptions {
    pub clustering: ClusteringChoice,
    /// Maximum number of mutexes per cluster for the bounded policy.
    pub cluster_size: usize,
    /// Maximum number of globals per variable cluster.
    pub relational_width: usize,
    pub path_sensitivity: PathSensitivity,
    pub max_rounds: usize,
    /// Rounds of plain joins before updates switch to widening.
    pub widen_after: usize,
    pub workers: usize,
    pub domain: DomainChoice,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            clustering: ClusteringChoice::Bounded,
            cluster_size: 2,
            relational_width: 2,
            path_sensitivity: PathSensitivity::ThreadFlag,
            max_rounds: 32,
            widen_after: 3,
            workers: 1,
            domain: DomainChoice::Interval,
        }
    }
}

impl AnalysisOptions {
    /// Set one option from its textual form (`analysis { }` block or CLI).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), PipelineError> {
        let invalid = |reason: &str| PipelineError::Options {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let positive = || {
            value
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| invalid("expected a positive integer"))
        };
        match key {
            "clustering" => {
                self.clustering = match value {
                    "singleton" => ClusteringChoice::Singleton,
                    "bounded" => ClusteringChoice::Bounded,
                    _ => return Err(invalid("expected 'singleton' or 'bounded'")),
                }
            }
            "cluster_size" => self.cluster_size = positive()?,
            "relational_width" => self.relational_width = positive()?,
            "path_sensitivity" => {
                self.path_sensitivity = match value {
                    "threadflag" => PathSensitivity::ThreadFlag,
                    "merged" => PathSensitivity::Merged,
                    _ => return Err(invalid("expected 'threadflag' or 'merged'")),
                }
            }
            "max_rounds" => self.max_rounds = positive()?,
            "widen_after" => {
                self.widen_after = value
                    .parse()
                    .map_err(|_| invalid("expected a non-negative integer"))?
            }
            "workers" => self.workers = positive()?,
            "domain" => {
                self.domain = match value {
                    "interval" => DomainChoice::Interval,
                    "constant" => DomainChoice::Constant,
                    _ => return Err(invalid("expected 'interval' or 'constant'")),
                }
            }
            _ => return Err(invalid("unknown option")),
        }
        Ok(())
    }

    /// Apply every `key: value` pair in order.
    pub fn apply_all<'a>(
        &mut self,
        entries: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<(), PipelineError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Defaults, then the program's `analysis { }` block, then `overrides`.
    pub fn resolve(
        program: &ThreadedProgram,
        overrides: &IndexMap<String, String>,
    ) -> Result<Self, PipelineError> {
        let mut options = Self::default();
        options.apply_all(&program.analysis)?;
        options.apply_all(overrides)?;
        Ok(options)
    }

    fn policy(&self) -> Box<dyn ClusteringPolicy> {
        match self.clustering {
            ClusteringChoice::Singleton => Box::new(SingletonClusters),
            ClusteringChoice::Bounded => Box::new(BoundedClusters {
                max_size: self.cluster_size,
            }),
        }
    }
}

/// Parse `.lmt` source.
pub fn parse(source: &str, filename: &str) -> Result<ast::Program, PipelineError> {
    lockmeet_dsl::parse(source, filename).map_err(PipelineError::from)
}

/// Lower an AST into the threaded program.
pub fn lower(program: &ast::Program) -> Result<ThreadedProgram, PipelineError> {
    lowering::lower(program).map_err(PipelineError::from)
}

/// Lower with source spans attached to errors.
pub fn lower_with_source(
    program: &ast::Program,
    source: &str,
    filename: &str,
) -> Result<ThreadedProgram, PipelineError> {
    lowering::lower_with_source(program, source, filename).map_err(PipelineError::from)
}

pub fn build_cluster_table(
    program: &ThreadedProgram,
    options: &AnalysisOptions,
) -> Result<ClusterTable, PipelineError> {
    let policy = options.policy();
    let table = ClusterTable::build(program, policy.as_ref())?;
    info!(
        policy = table.policy(),
        clusters = table.len(),
        mutexes = program.mutexes.len(),
        "Built mutex cluster table"
    );
    Ok(table)
}

pub fn cluster_summaries(program: &ThreadedProgram, table: &ClusterTable) -> Vec<ClusterSummary> {
    table
        .clusters()
        .iter()
        .enumerate()
        .map(|(id, c)| ClusterSummary {
            id,
            mutexes: c
                .mutexes
                .iter()
                .map(|&m| program.mutexes[m].name.clone())
                .collect(),
            globals: c
                .globals
                .iter()
                .map(|&g| program.globals[g].name.clone())
                .collect(),
        })
        .collect()
}

/// Final state of a fixpoint run.
#[derive(Debug, Clone)]
pub struct FixpointResult<D> {
    pub store: ProtectedStore<D>,
    pub rounds: usize,
    pub converged: bool,
    /// Replays of the last round, in thread order.
    pub outcomes: Vec<ReplayOutcome<D>>,
}

/// Replay every reachable thread until the store stops changing.
pub fn run_fixpoint<D: ValueDomain>(
    program: &ThreadedProgram,
    table: &ClusterTable,
    options: &AnalysisOptions,
) -> Result<FixpointResult<D>, PipelineError> {
    let layout = ClusterLayout::new(table, options.relational_width);
    info!(
        width = options.relational_width,
        slots = layout.slot_count(),
        "Laid out variable clusters"
    );
    let mut store = ProtectedStore::seeded(program, table, &layout);
    let threads = program.reachable_threads();
    let mut outcomes = Vec::new();
    let mut converged = false;
    let mut rounds = 0;

    while rounds < options.max_rounds {
        rounds += 1;
        let started = Instant::now();
        let privatizer = Privatizer::new(
            program,
            table,
            &layout,
            &store,
            options.path_sensitivity,
        );
        outcomes = replay_all(&privatizer, &threads, options.workers)?;

        let mode = if rounds > options.widen_after {
            UpdateMode::Widen
        } else {
            UpdateMode::Join
        };
        let mut changed = 0usize;
        for update in outcomes.iter().flat_map(|o| &o.updates) {
            if store.apply(update, mode) {
                changed += 1;
            }
        }
        info!(
            round = rounds,
            changed,
            widening = mode == UpdateMode::Widen,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fixpoint round complete"
        );
        if changed == 0 {
            converged = true;
            break;
        }
    }

    Ok(FixpointResult {
        store,
        rounds,
        converged,
        outcomes,
    })
}

fn replay_all<D: ValueDomain>(
    privatizer: &Privatizer<'_, D>,
    threads: &[ThreadId],
    workers: usize,
) -> Result<Vec<ReplayOutcome<D>>, PipelineError> {
    if workers <= 1 || threads.len() <= 1 {
        return Ok(threads.iter().map(|&t| privatizer.replay(t)).collect());
    }
    let chunk = threads.len().div_ceil(workers);
    std::thread::scope(|s| {
        let joins: Vec<_> = threads
            .chunks(chunk)
            .map(|part| {
                s.spawn(move || {
                    part.iter()
                        .map(|&t| privatizer.replay(t))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut out = Vec::with_capacity(threads.len());
        for j in joins {
            let part = j
                .join()
                .map_err(|_| PipelineError::Worker("replay worker panicked".to_string()))?;
            out.extend(part);
        }
        Ok(out)
    })
}

/// Run the analysis with value domain `D`.
pub fn analyze_with<D: ValueDomain>(
    program: &ThreadedProgram,
    options: &AnalysisOptions,
) -> Result<AnalysisReport, PipelineError> {
    info!(
        program = %program.name,
        threads = program.threads.len(),
        globals = program.globals.len(),
        "Analyzing program"
    );
    let table = build_cluster_table(program, options)?;
    let fix = run_fixpoint::<D>(program, &table, options)?;

    let mut diagnostics = Vec::new();
    for (t, thread) in program.threads.iter().enumerate() {
        if t != program.main && thread.multiplicity == Multiplicity::Never {
            diagnostics.push(ProtocolDiagnostic::new(
                DiagnosticKind::NeverSpawned,
                Some(&thread.name),
                None,
                format!("thread '{}' is never spawned", thread.name),
            ));
        }
    }
    let mut assertions = Vec::new();
    for outcome in &fix.outcomes {
        diagnostics.extend(outcome.diagnostics.iter().cloned());
        assertions.extend(outcome.assertions.iter().cloned());
    }
    if !fix.converged {
        diagnostics.push(ProtocolDiagnostic::new(
            DiagnosticKind::NonConvergence,
            None,
            None,
            format!(
                "protected state still changing after {} rounds; all verdicts downgraded",
                fix.rounds
            ),
        ));
        for a in &mut assertions {
            a.verdict = Verdict::Unknown;
        }
    }
    for d in &diagnostics {
        warn!(kind = ?d.kind, thread = d.thread.as_deref().unwrap_or("-"), "{}", d.message);
    }

    let store = fix
        .store
        .global_summary(&table)
        .into_iter()
        .map(|(g, v)| GlobalValue {
            global: program.globals[g].name.clone(),
            value: v.to_string(),
        })
        .collect();

    let report = AnalysisReport {
        program: program.name.clone(),
        source_sha256: None,
        options: options.clone(),
        rounds: fix.rounds,
        converged: fix.converged,
        clusters: cluster_summaries(program, &table),
        assertions,
        diagnostics,
        store,
    };
    info!(
        holds = report.count(Verdict::Holds),
        violated = report.count(Verdict::Violated),
        unknown = report.count(Verdict::Unknown),
        rounds = report.rounds,
        "Analysis complete"
    );
    Ok(report)
}

/// Run the analysis with the domain named in `options`.
pub fn analyze(
    program: &ThreadedProgram,
    options: &AnalysisOptions,
) -> Result<AnalysisReport, PipelineError> {
    match options.domain {
        DomainChoice::Interval => analyze_with::<Interval>(program, options),
        DomainChoice::Constant => analyze_with::<Constant>(program, options),
    }
}

pub fn source_sha256(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// Parse, lower and analyze `.lmt` source. `overrides` take precedence over
/// the file's `analysis { }` block.
pub fn analyze_source(
    source: &str,
    filename: &str,
    overrides: &IndexMap<String, String>,
) -> Result<AnalysisReport, PipelineError> {
    info!("Parsing {filename}...");
    let ast = parse(source, filename)?;
    let program = lower_with_source(&ast, source, filename)?;
    let options = AnalysisOptions::resolve(&program, overrides)?;
    let mut report = analyze(&program, &options)?;
    report.source_sha256 = Some(source_sha256(source));
    Ok(report)
}
