//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use eyre::{Context, Result, eyre};
use std::fs;
use std::path::PathBuf;

use crate::template::PoolInputs;

/// SuperSugar - exhaustive prompt combinations, one per run
#[derive(Parser)]
#[command(
    name = "sg",
    about = "Walk a prompt template's combination space one item per run",
    version,
    after_help = "Logs are written to: ~/.local/share/supersugar/logs/sg.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Template and pools shared by the combination commands
#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    /// Template text with [n] anchors
    #[arg(short, long)]
    pub template: String,

    /// Pool text as N=TEXT; `\n` separates lines
    #[arg(short, long = "pool", value_name = "N=TEXT")]
    pub pools: Vec<String>,

    /// Pool read from a file as N=PATH
    #[arg(long = "pool-file", value_name = "N=PATH")]
    pub pool_files: Vec<String>,
}

impl TemplateArgs {
    /// Collect `--pool` and `--pool-file` values into pool inputs
    pub fn pool_inputs(&self) -> Result<PoolInputs> {
        let mut pools = PoolInputs::new();
        for raw in &self.pools {
            let (number, text) = split_pool_arg(raw)?;
            pools.insert(number, text.replace("\\n", "\n"));
        }
        for raw in &self.pool_files {
            let (number, path) = split_pool_arg(raw)?;
            let text = fs::read_to_string(path).context(format!("Failed to read pool file {}", path))?;
            pools.insert(number, text);
        }
        Ok(pools)
    }
}

fn split_pool_arg(raw: &str) -> Result<(u32, &str)> {
    let (number, value) = raw
        .split_once('=')
        .ok_or_else(|| eyre!("Expected N=VALUE, got '{}'", raw))?;
    let number: u32 = number
        .trim()
        .parse()
        .context(format!("Pool number must be a positive integer: '{}'", number))?;
    if number == 0 {
        return Err(eyre!("Pool numbers start at 1"));
    }
    Ok((number, value))
}

/// Combinator run options
#[derive(Args, Debug, Clone)]
pub struct StepArgs {
    #[command(flatten)]
    pub template: TemplateArgs,

    /// Start index for a fresh configuration, or a manual reposition
    #[arg(short, long, default_value = "0")]
    pub start_index: u64,

    /// Ceiling on processed combinations, 0 for none (default: from config)
    #[arg(short, long)]
    pub max_combinations: Option<u64>,

    /// Disable auto-queue for this run
    #[arg(long)]
    pub no_auto_queue: bool,

    /// Host node id for widget updates
    #[arg(long)]
    pub node_id: Option<String>,

    /// State file (default: configured state dir)
    #[arg(long)]
    pub state: Option<PathBuf>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Produce the next combination and advance the cursor
    Step {
        #[command(flatten)]
        args: StepArgs,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Step repeatedly while the combinator keeps requesting another run
    Run {
        #[command(flatten)]
        args: StepArgs,

        /// Stop after this many runs regardless
        #[arg(long)]
        max_runs: Option<u64>,
    },

    /// Print the re-run key (`nan` forces a run)
    ShouldRecompute {
        #[command(flatten)]
        args: StepArgs,
    },

    /// Print every combination
    Generate {
        #[command(flatten)]
        template: TemplateArgs,

        /// Refuse spaces larger than this (default: from config)
        #[arg(long)]
        max_materialize: Option<u64>,

        /// Print the list, total and hash as JSON
        #[arg(long)]
        json: bool,
    },

    /// Step the list controller over a generated combination list
    Control {
        #[command(flatten)]
        template: TemplateArgs,

        /// Index mode (auto, specified, from-start)
        #[arg(short, long, default_value = "auto")]
        mode: String,

        /// Index used by the specified mode
        #[arg(short, long, default_value = "0")]
        start_index: u64,

        /// Ceiling on iterations
        #[arg(long, default_value = "100")]
        max_iterations: u64,

        /// State file (default: configured state dir)
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Load one image from a directory
    LoadImage {
        /// Image directory
        dir: PathBuf,

        /// File pattern; `*` means any image extension
        #[arg(short, long, default_value = "*")]
        pattern: String,

        /// Batch mode (single, incremental, random)
        #[arg(short, long, default_value = "single")]
        mode: String,

        /// Index used by the single mode
        #[arg(short, long, default_value = "0")]
        index: u64,

        /// Seed used by the random mode
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Counter label used by the incremental mode
        #[arg(long, default_value = "Batch 001")]
        label: String,

        /// Keep an alpha channel when present
        #[arg(long)]
        allow_rgba: bool,

        /// Print the directory's re-run key (`nan` forces a run) instead of loading
        #[arg(long)]
        print_marker: bool,
    },

    /// Save an image together with a text file
    Save {
        /// Source image
        image: PathBuf,

        /// Text saved next to it
        #[arg(short, long)]
        text: String,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// File name prefix
        #[arg(long, default_value = "c_output")]
        prefix: String,

        /// Separator between prefix and number
        #[arg(long, default_value = "-")]
        delimiter: String,

        /// Zero padding of the number
        #[arg(long, default_value = "4")]
        padding: usize,

        /// Image format (png, jpg, webp, bmp)
        #[arg(short, long, default_value = "png")]
        format: String,

        /// Text file extension
        #[arg(long, default_value = ".txt")]
        text_extension: String,
    },
}
