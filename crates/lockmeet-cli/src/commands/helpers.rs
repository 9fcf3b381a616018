// Shared helpers for the command handlers: reading sources, turning flags
// into option overrides, and writing JSON artifacts.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use miette::IntoDiagnostic;
use serde::Serialize;

use crate::cli::AnalysisArgs;

pub(crate) fn read_source(path: &Path) -> miette::Result<(String, String)> {
    let source = fs::read_to_string(path)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("cannot read {}", path.display())))?;
    Ok((source, path.display().to_string()))
}

/// Option overrides in the textual form `AnalysisOptions::set` accepts.
pub(crate) fn overrides_from_args(args: &AnalysisArgs) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            out.insert(key.to_string(), value);
        }
    };
    put("clustering", args.clustering.clone());
    put("cluster_size", args.cluster_size.map(|n| n.to_string()));
    put("relational_width", args.relational_width.map(|n| n.to_string()));
    put("path_sensitivity", args.path_sensitivity.clone());
    put("max_rounds", args.max_rounds.map(|n| n.to_string()));
    put("widen_after", args.widen_after.map(|n| n.to_string()));
    put("workers", args.workers.map(|n| n.to_string()));
    put("domain", args.domain.clone());
    out
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> miette::Result<String> {
    serde_json::to_string_pretty(value).into_diagnostic()
}

pub(crate) fn write_json_artifact<T: Serialize>(path: &Path, value: &T) -> miette::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).into_diagnostic()?;
    }
    fs::write(path, to_json(value)?).into_diagnostic()?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}
