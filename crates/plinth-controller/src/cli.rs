use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plinth")]
#[command(about = "Plinth: declarative platform deployment")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Controller settings file (defaults to ./plinth.toml when present)
    #[arg(short, long, global = true, env = "PLINTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level, overrides the settings file
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile the manifest once and exit
    Apply(ApplyArgs),
    /// Reconcile continuously, following manifest changes
    Run(RunArgs),
    /// Show the persisted reconciliation status
    Status(StatusArgs),
}

#[derive(Args)]
pub struct ManifestArgs {
    /// Configuration manifest (TOML or JSON)
    pub manifest: PathBuf,

    /// Secrets and config maps that overrides read from
    #[arg(long)]
    pub values: Option<PathBuf>,

    /// File persisting the reconciliation status between runs
    #[arg(long, env = "PLINTH_STATE")]
    pub state: Option<PathBuf>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Re-apply even when nothing changed
    #[arg(long)]
    pub rerun: bool,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,
}

#[derive(Args)]
pub struct StatusArgs {
    /// State file written by `apply` or `run`
    #[arg(env = "PLINTH_STATE")]
    pub state: PathBuf,
}
