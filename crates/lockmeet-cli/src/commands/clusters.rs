use std::path::PathBuf;

use indexmap::IndexMap;
use lockmeet_engine::pipeline::{self, AnalysisOptions};
use lockmeet_engine::result::ClusterSummary;
use serde::Serialize;

use super::helpers::{read_source, to_json};
use crate::cli::OutputFormat;

#[derive(Debug, Serialize)]
struct ClusterListing {
    program: String,
    policy: String,
    clusters: Vec<ClusterSummary>,
    /// Globals no mutex protects.
    unprotected: Vec<String>,
}

/// Handler for the `clusters` subcommand.
pub(crate) fn run_clusters_command(
    file: PathBuf,
    format: OutputFormat,
    clustering: Option<String>,
    cluster_size: Option<usize>,
) -> miette::Result<()> {
    let (source, filename) = read_source(&file)?;
    let ast = pipeline::parse(&source, &filename)?;
    let program = pipeline::lower_with_source(&ast, &source, &filename)?;

    let mut overrides = IndexMap::new();
    if let Some(policy) = clustering {
        overrides.insert("clustering".to_string(), policy);
    }
    if let Some(size) = cluster_size {
        overrides.insert("cluster_size".to_string(), size.to_string());
    }
    let options = AnalysisOptions::resolve(&program, &overrides)?;
    let table = pipeline::build_cluster_table(&program, &options)?;

    let listing = ClusterListing {
        program: program.name.clone(),
        policy: table.policy().to_string(),
        clusters: pipeline::cluster_summaries(&program, &table),
        unprotected: (0..program.globals.len())
            .filter(|&g| table.owner_of(g).is_none())
            .map(|g| program.globals[g].name.clone())
            .collect(),
    };

    match format {
        OutputFormat::Json => println!("{}", to_json(&listing)?),
        OutputFormat::Text => print!("{}", render_listing_text(&listing)),
    }
    Ok(())
}

fn render_listing_text(listing: &ClusterListing) -> String {
    let mut out = format!(
        "Program: {}\nPolicy: {}\n",
        listing.program, listing.policy
    );
    for c in &listing.clusters {
        out.push_str(&format!(
            "  #{} mutexes [{}] globals [{}]\n",
            c.id,
            c.mutexes.join(", "),
            c.globals.join(", ")
        ));
    }
    if !listing.unprotected.is_empty() {
        out.push_str(&format!(
            "Unprotected globals: {}\n",
            listing.unprotected.join(", ")
        ));
    }
    out
}
