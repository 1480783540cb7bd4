//! CLI argument parsing for loopstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "loopstore")]
#[command(author, version, about = "Inspect and reset persisted loop cursors", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a state record
    Show {
        /// Record file (default: configured state dir + filename)
        path: Option<PathBuf>,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset a record to its defaults
    Reset {
        /// Record file (default: configured state dir + filename)
        path: Option<PathBuf>,

        /// Delete the file instead of writing a default record
        #[arg(long)]
        delete: bool,
    },

    /// Print the resolved record path
    Path,

    /// Fingerprint key=value pairs the way the nodes do
    Fingerprint {
        /// Inputs as key=value
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}
