use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tst_ledger::{ConfigError, Ledger, LedgerConfig, LedgerError, ManualClock, ScriptStep};

#[derive(Parser)]
#[command(name = "tst-ledger")]
#[command(about = "Replay and inspect the TST access-control ledger")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a JSON-lines command script against a fresh ledger
    Replay {
        script: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the final snapshot here instead of stdout
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },
    /// Print the tier catalog as JSON
    Tiers {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the built-in configuration as TOML
    DefaultConfig,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{path}:{line}: {source}")]
    Script {
        path: String,
        line: usize,
        source: serde_json::Error,
    },
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "tst_ledger=debug" } else { "tst_ledger=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Replay {
            script,
            config,
            snapshot,
        } => replay(&script, load_config(config.as_deref())?, snapshot.as_deref()),
        Command::Tiers { config } => {
            let ledger = Ledger::with_system_clock(load_config(config.as_deref())?);
            println!("{}", serde_json::to_string_pretty(&ledger.tier_catalog())?);
            Ok(())
        }
        Command::DefaultConfig => {
            print!("{}", LedgerConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<LedgerConfig, ConfigError> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            LedgerConfig::load(path)
        }
        None => Ok(LedgerConfig::default()),
    }
}

fn replay(script: &Path, config: LedgerConfig, snapshot: Option<&Path>) -> Result<(), CliError> {
    let clock = Arc::new(ManualClock::new(0));
    let ledger = Ledger::new(config, clock.clone());
    let reader = BufReader::new(fs::File::open(script)?);

    let mut failures = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let step: ScriptStep = serde_json::from_str(&line).map_err(|source| CliError::Script {
            path: script.display().to_string(),
            line: index + 1,
            source,
        })?;
        if let Some(at) = step.at {
            clock.set(at);
        }
        let report = match ledger.execute(&step.command) {
            Ok(outcome) => json!({ "line": index + 1, "ok": outcome }),
            Err(err) => {
                failures += 1;
                warn!(line = index + 1, error = %err, "command rejected");
                json!({ "line": index + 1, "error": err.code(), "message": err.to_string() })
            }
        };
        println!("{report}");
    }

    let snap = ledger.snapshot();
    info!(failures, state_root = %snap.state_root_hex(), "replay finished");
    let rendered = serde_json::to_string_pretty(&snap)?;
    match snapshot {
        Some(path) => fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}
