#![doc = include_str!("../README.md")]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            file,
            format,
            out,
            analysis,
        } => {
            let status = commands::analyze::run_analyze_command(file, format, out, analysis)?;
            if status != 0 {
                std::process::exit(status);
            }
        }
        Commands::Clusters {
            file,
            format,
            clustering,
            cluster_size,
        } => {
            commands::clusters::run_clusters_command(file, format, clustering, cluster_size)?;
        }
        Commands::Parse { file } => {
            commands::parse::run_parse_command(file)?;
        }
    }
    Ok(())
}
