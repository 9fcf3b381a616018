use std::path::PathBuf;

use lockmeet_engine::pipeline;

use super::helpers::{read_source, to_json};

/// Handler for the `parse` subcommand.
pub(crate) fn run_parse_command(file: PathBuf) -> miette::Result<()> {
    let (source, filename) = read_source(&file)?;
    let program = pipeline::parse(&source, &filename)?;
    println!("{}", to_json(&program)?);
    Ok(())
}
