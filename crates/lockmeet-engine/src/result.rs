use serde::Serialize;
use std::fmt;

use lockmeet_ir::program::SourceLoc;

use crate::pipeline::AnalysisOptions;
use crate::query::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Classification of a locking-protocol diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnlockNotHeld,
    UnprotectedRead,
    UnprotectedWrite,
    JoinUnspawned,
    HeldAtExit,
    NeverSpawned,
    NonConvergence,
}

impl DiagnosticKind {
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::UnlockNotHeld
            | DiagnosticKind::UnprotectedRead
            | DiagnosticKind::UnprotectedWrite
            | DiagnosticKind::NonConvergence => Severity::Error,
            DiagnosticKind::JoinUnspawned
            | DiagnosticKind::HeldAtExit
            | DiagnosticKind::NeverSpawned => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolDiagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub thread: Option<String>,
    pub location: Option<SourceLoc>,
    pub message: String,
}

impl ProtocolDiagnostic {
    pub fn new(
        kind: DiagnosticKind,
        thread: Option<&str>,
        location: Option<SourceLoc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            thread: thread.map(str::to_string),
            location,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionOutcome {
    pub thread: String,
    pub line: usize,
    pub column: usize,
    pub predicate: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub mutexes: Vec<String>,
    pub globals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalValue {
    pub global: String,
    pub value: String,
}

/// Outcome of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub program: String,
    /// SHA-256 of the analyzed source text, when analyzed from source.
    pub source_sha256: Option<String>,
    pub options: AnalysisOptions,
    pub rounds: usize,
    pub converged: bool,
    pub clusters: Vec<ClusterSummary>,
    pub assertions: Vec<AssertionOutcome>,
    pub diagnostics: Vec<ProtocolDiagnostic>,
    pub store: Vec<GlobalValue>,
}

impl AnalysisReport {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.assertions
            .iter()
            .filter(|a| a.verdict == verdict)
            .count()
    }

    /// Verdict of the first assertion with this predicate text.
    pub fn verdict_of(&self, predicate: &str) -> Option<Verdict> {
        self.assertions
            .iter()
            .find(|a| a.predicate == predicate)
            .map(|a| a.verdict)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Program: {}", self.program)?;
        writeln!(
            f,
            "Fixpoint: {} after {} round(s)",
            if self.converged { "converged" } else { "NOT converged" },
            self.rounds
        )?;
        writeln!(f, "Clusters:")?;
        for c in &self.clusters {
            writeln!(
                f,
                "  #{} mutexes [{}] globals [{}]",
                c.id,
                c.mutexes.join(", "),
                c.globals.join(", ")
            )?;
        }
        writeln!(f, "Assertions:")?;
        if self.assertions.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for a in &self.assertions {
            writeln!(
                f,
                "  [{}] {}:{}:{} assert {}",
                a.verdict, a.thread, a.line, a.column, a.predicate
            )?;
        }
        if !self.diagnostics.is_empty() {
            writeln!(f, "Diagnostics:")?;
            for d in &self.diagnostics {
                let sev = match d.severity {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                };
                write!(f, "  {sev}:")?;
                if let Some(thread) = &d.thread {
                    write!(f, " {thread}")?;
                }
                if let Some(loc) = d.location {
                    write!(f, ":{loc}")?;
                }
                writeln!(f, " {}", d.message)?;
            }
        }
        writeln!(f, "Protected state:")?;
        for v in &self.store {
            writeln!(f, "  {} in {}", v.global, v.value)?;
        }
        write!(
            f,
            "Summary: {} holds, {} violated, {} unknown",
            self.count(Verdict::Holds),
            self.count(Verdict::Violated),
            self.count(Verdict::Unknown)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> AnalysisReport {
        AnalysisReport {
            program: "P".into(),
            source_sha256: None,
            options: AnalysisOptions::default(),
            rounds: 2,
            converged: true,
            clusters: vec![ClusterSummary {
                id: 0,
                mutexes: vec!["A".into()],
                globals: vec!["g".into()],
            }],
            assertions: vec![AssertionOutcome {
                thread: "main".into(),
                line: 4,
                column: 5,
                predicate: "g == 0".into(),
                verdict: Verdict::Holds,
            }],
            diagnostics: vec![ProtocolDiagnostic::new(
                DiagnosticKind::HeldAtExit,
                Some("main"),
                Some(SourceLoc { line: 9, column: 1 }),
                "mutex 'A' still held at thread exit",
            )],
            store: vec![GlobalValue {
                global: "g".into(),
                value: "[0, 0]".into(),
            }],
        }
    }

    #[test]
    fn text_rendering_lists_verdicts_and_diagnostics() {
        let text = report().to_string();
        assert!(text.contains("[holds] main:4:5 assert g == 0"));
        assert!(text.contains("warning: main:9:1 mutex 'A' still held at thread exit"));
        assert!(text.ends_with("Summary: 1 holds, 0 violated, 0 unknown"));
    }

    #[test]
    fn json_uses_snake_case_enums() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["assertions"][0]["verdict"], "holds");
        assert_eq!(json["diagnostics"][0]["kind"], "held_at_exit");
        assert_eq!(json["diagnostics"][0]["severity"], "warning");
        assert_eq!(json["options"]["path_sensitivity"], "threadflag");
    }

    #[test]
    fn warnings_are_not_errors() {
        let r = report();
        assert!(!r.has_errors());
        assert_eq!(r.verdict_of("g == 0"), Some(Verdict::Holds));
    }
}
