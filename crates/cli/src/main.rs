mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{cmd_apply, cmd_hash, cmd_info, cmd_plan, cmd_status};

/// ldeploy - incremental, content-addressed function deployment
#[derive(Parser)]
#[command(name = "ldeploy")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log output (-v info, -vv debug). RUST_LOG overrides.
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Project file (default: nearest layerdeploy.toml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Output as JSON
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Package, build layers and apply units whose fingerprints changed
  Apply {
    /// Units to apply (default: all)
    units: Vec<String>,
  },

  /// Show what apply would do without building or writing anything
  Plan {
    /// Units to plan (default: all)
    units: Vec<String>,
  },

  /// Show last applied state per unit
  Status,

  /// Print the fingerprint of a file or directory
  Hash {
    path: PathBuf,

    /// Exclude pattern (gitignore syntax), repeatable
    #[arg(short, long)]
    exclude: Vec<String>,
  },

  /// Show platform and directory information
  Info,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = match cli.verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = cli.config.as_deref();
  match cli.command {
    Commands::Apply { units } => cmd_apply(config, &units, cli.json),
    Commands::Plan { units } => cmd_plan(config, &units, cli.json),
    Commands::Status => cmd_status(config, cli.json),
    Commands::Hash { path, exclude } => cmd_hash(&path, exclude, cli.json),
    Commands::Info => cmd_info(config, cli.json),
  }
}
