//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Thread-modular analysis of lock-protected globals (mutex-meet privatization with clustering).\n\n\
    Typical use:\n  \
    1. lockmeet clusters scenario.lmt\n  \
    2. lockmeet analyze scenario.lmt\n  \
    3. lockmeet analyze scenario.lmt --relational-width 1 --format json\n\n\
    Flags override the file's `analysis { }` block.";

#[derive(Parser)]
#[command(name = "lockmeet")]
#[command(about = "Thread-modular analysis of lock-protected globals")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the privatization fixpoint and check every assertion
    #[command(display_order = 10)]
    Analyze {
        /// Path to the .lmt scenario file
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Also write the JSON report to this path
        #[arg(long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Print the mutex cluster table
    #[command(display_order = 20)]
    Clusters {
        /// Path to the .lmt scenario file
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Clustering policy: singleton | bounded
        #[arg(long)]
        clustering: Option<String>,

        /// Maximum mutexes per cluster (bounded policy)
        #[arg(long)]
        cluster_size: Option<usize>,
    },

    /// Parse a scenario file and print its syntax tree as JSON
    #[command(display_order = 30)]
    Parse {
        /// Path to the .lmt scenario file
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Analysis options accepted on the command line. Unset flags fall back to
/// the file's `analysis { }` block, then to the defaults.
#[derive(Args, Debug, Default)]
pub(crate) struct AnalysisArgs {
    /// Clustering policy: singleton | bounded
    #[arg(long)]
    pub(crate) clustering: Option<String>,

    /// Maximum mutexes per cluster (bounded policy)
    #[arg(long)]
    pub(crate) cluster_size: Option<usize>,

    /// Maximum globals tracked together in one relation
    #[arg(long)]
    pub(crate) relational_width: Option<usize>,

    /// Path sensitivity: threadflag | merged
    #[arg(long)]
    pub(crate) path_sensitivity: Option<String>,

    /// Fixpoint round limit
    #[arg(long)]
    pub(crate) max_rounds: Option<usize>,

    /// Rounds of plain joins before widening
    #[arg(long)]
    pub(crate) widen_after: Option<usize>,

    /// Replay worker threads
    #[arg(long)]
    pub(crate) workers: Option<usize>,

    /// Value domain: interval | constant
    #[arg(long)]
    pub(crate) domain: Option<String>,
}
