#![allow(dead_code)]

use indexmap::IndexMap;
use lockmeet_engine::pipeline::{analyze_source, AnalysisOptions};
use lockmeet_engine::result::AnalysisReport;
use lockmeet_ir::program::ThreadedProgram;

pub fn load_fixture(name: &str) -> String {
    let path = format!("{}/../../fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {path}: {e}"))
}

pub fn load_all_fixtures() -> Vec<(String, String)> {
    let dir = format!("{}/../../fixtures", env!("CARGO_MANIFEST_DIR"));
    let mut files: Vec<std::path::PathBuf> = std::fs::read_dir(&dir)
        .unwrap_or_else(|e| panic!("Failed to read {dir}: {e}"))
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("lmt"))
        .collect();
    files.sort();
    files
        .into_iter()
        .map(|path| {
            let file = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown.lmt")
                .to_string();
            let src = std::fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));
            (file, src)
        })
        .collect()
}

pub fn lower_fixture(name: &str) -> ThreadedProgram {
    let src = load_fixture(name);
    let ast = lockmeet_dsl::parse(&src, name).unwrap_or_else(|e| panic!("parse {name}: {e}"));
    lockmeet_ir::lowering::lower(&ast).unwrap_or_else(|e| panic!("lower {name}: {e}"))
}

/// Analyze a fixture with `key=value` overrides on top of its own options.
pub fn analyze_fixture(name: &str, overrides: &[(&str, &str)]) -> AnalysisReport {
    let src = load_fixture(name);
    let overrides: IndexMap<String, String> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    analyze_source(&src, name, &overrides).unwrap_or_else(|e| panic!("analyze {name}: {e}"))
}

pub fn options(overrides: &[(&str, &str)]) -> AnalysisOptions {
    let mut opts = AnalysisOptions::default();
    for (k, v) in overrides {
        opts.set(k, v).unwrap_or_else(|e| panic!("option {k}={v}: {e}"));
    }
    opts
}
