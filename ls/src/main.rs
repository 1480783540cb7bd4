use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use loopstore::cli::{Cli, Command};
use loopstore::config::Config;
use loopstore::{CONTROL_KEYS, JsonFileStore, LoopState, StateStore, fingerprint};

fn setup_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("loopstore starting");

    match cli.command {
        Command::Show { path, json } => {
            let store = JsonFileStore::new(config.resolve(path.as_ref()));
            match store.try_load()? {
                Some(state) if json => println!("{}", serde_json::to_string_pretty(&state)?),
                Some(state) => {
                    println!("Record: {}", store.path().display().to_string().cyan());
                    println!("  Index: {}", state.global_index);
                    println!(
                        "  Completed: {}",
                        if state.is_completed {
                            "yes".green()
                        } else {
                            "no".yellow()
                        }
                    );
                    println!("  Hash: {}", state.short_hash());
                    if let Some(start) = state.last_start_index {
                        println!("  Last start index: {}", start);
                    }
                    if let Some(mode) = &state.last_mode {
                        println!("  Last mode: {}", mode);
                    }
                }
                None => println!("No record at {}", store.path().display()),
            }
        }
        Command::Reset { path, delete } => {
            let store = JsonFileStore::new(config.resolve(path.as_ref()));
            if delete {
                store.clear()?;
                println!("{} Deleted record: {}", "✓".green(), store.path().display());
            } else {
                store.save(&LoopState::default())?;
                println!("{} Reset record: {}", "✓".green(), store.path().display());
            }
        }
        Command::Path => {
            println!("{}", config.resolve(None).display());
        }
        Command::Fingerprint { pairs } => {
            let mut inputs = Vec::with_capacity(pairs.len());
            for pair in &pairs {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| eyre::eyre!("Expected key=value, got: {}", pair))?;
                inputs.push((key.to_string(), value.replace("\\n", "\n")));
            }
            println!("{}", fingerprint(inputs, CONTROL_KEYS));
        }
    }

    Ok(())
}
