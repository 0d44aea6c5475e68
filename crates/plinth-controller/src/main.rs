mod cli;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;

use cli::{Cli, Commands, ManifestArgs};
use output::{print_error, print_outcome, print_status, print_success};
use plinth_controller::observability;
use plinth_controller::settings::{Settings, loader};
use plinth_controller::{LocalOptions, LocalRuntime, StateFile};

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let cli = Cli::parse();
    observability::init_tracing(cli.log_level.as_deref());

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded
async fn run(cli: Cli) -> Result<bool> {
    let Cli {
        command,
        config,
        log_level,
    } = cli;

    match command {
        Commands::Apply(args) => {
            let settings = load_settings(config.as_deref(), log_level.as_deref())?;
            let runtime = LocalRuntime::new(&settings, local_options(args.manifest))
                .context("failed to set up local runtime")?;

            let outcome = runtime.apply_once(args.rerun).await?;
            print_outcome(&outcome);
            Ok(!outcome.is_failed())
        }
        Commands::Run(args) => {
            let settings = load_settings(config.as_deref(), log_level.as_deref())?;
            let runtime = LocalRuntime::new(&settings, local_options(args.manifest))
                .context("failed to set up local runtime")?;

            let shutdown = runtime.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, finishing current unit");
                    shutdown.cancel();
                }
            });

            runtime.run().await?;
            print_success("Controller stopped");
            Ok(true)
        }
        Commands::Status(args) => {
            let state = StateFile::load(&args.state)?
                .with_context(|| format!("no state recorded at {}", args.state.display()))?;
            print_status(&format!("{}/{}", state.namespace, state.name), &state.status);
            Ok(state.status.last_error.is_none())
        }
    }
}

fn load_settings(path: Option<&Path>, log_level: Option<&str>) -> Result<Settings> {
    let settings = loader::load_settings(path).context("failed to load settings")?;
    // An explicit --log-level is already in effect
    if log_level.is_none() && !observability::apply_logging_level(&settings.logging.level) {
        tracing::debug!(level = %settings.logging.level, "Keeping log filter from RUST_LOG");
    }

    tracing::info!(
        resource = %settings.controller.resource_key(),
        workers = settings.controller.workers,
        max_parallel = settings.orchestrator.max_parallel,
        policy = ?settings.orchestrator.ordered_failure_policy,
        "Settings loaded"
    );
    Ok(settings)
}

fn local_options(args: ManifestArgs) -> LocalOptions {
    let mut options = LocalOptions::new(args.manifest);
    if let Some(values) = args.values {
        options = options.with_values(values);
    }
    if let Some(state) = args.state {
        options = options.with_state(state);
    }
    options
}
