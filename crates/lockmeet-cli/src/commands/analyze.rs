use std::path::PathBuf;

use lockmeet_engine::query::Verdict;
use lockmeet_engine::result::AnalysisReport;

use super::helpers::{overrides_from_args, read_source, to_json, write_json_artifact};
use crate::cli::{AnalysisArgs, OutputFormat};

/// Exit status when some assertion is violated or the run reported an
/// error-severity diagnostic.
pub(crate) const EXIT_FINDINGS: i32 = 2;

/// Handler for the `analyze` subcommand. Returns the process exit status.
pub(crate) fn run_analyze_command(
    file: PathBuf,
    format: OutputFormat,
    out: Option<PathBuf>,
    analysis: AnalysisArgs,
) -> miette::Result<i32> {
    let (source, filename) = read_source(&file)?;
    let overrides = overrides_from_args(&analysis);
    let report = lockmeet_engine::pipeline::analyze_source(&source, &filename, &overrides)?;

    match format {
        OutputFormat::Json => println!("{}", to_json(&report)?),
        OutputFormat::Text => println!("{report}"),
    }
    if let Some(path) = out {
        write_json_artifact(&path, &report)?;
    }
    Ok(exit_status(&report))
}

fn exit_status(report: &AnalysisReport) -> i32 {
    if report.count(Verdict::Violated) > 0 || report.has_errors() {
        EXIT_FINDINGS
    } else {
        0
    }
}
