use crate::{
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, InterruptWatch},
};
use clap::Parser;
use commands::Commands;
use engine_config::settings::{EngineSettings, validator::SettingsValidator};
use engine_runtime::{
    context::EngineContext,
    controller::{BatchController, ControlOutcome},
    scheduler::ContinuationScheduler,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "enrich",
    version = "0.1.0",
    about = "Resumable row-by-row enrichment of spreadsheet data"
)]
struct Cli {
    #[arg(long, global = true, default_value = "enrich.json", help = "Settings file path")]
    config: PathBuf,

    #[arg(
        long,
        global = true,
        help = "KEY=VALUE file with the API key; ./.env is used when present"
    )]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let interrupts = InterruptWatch::install();

    let result = run(cli, &interrupts).await;
    if let Err(err) = &result {
        error!("{err}");
    }
    std::process::exit(ExitCode::of(&result, interrupts.interrupted()).as_i32());
}

async fn run(cli: Cli, interrupts: &InterruptWatch) -> Result<(), CliError> {
    let env = load_env(cli.env_file.as_deref())?;
    let settings = EngineSettings::load(&cli.config)?;
    let settings = SettingsValidator::new().validate(&settings)?;
    info!(job = %settings.job(), config = %cli.config.display(), "Settings loaded");

    let api_key = env.get(&settings.enrichment.api_key_env).map(str::to_string);
    let invocation = settings.invocation.clone();
    let controller = Arc::new(BatchController::new(EngineContext::from_settings(
        settings, api_key,
    )?));
    let scheduler = ContinuationScheduler::new(controller.clone(), invocation);
    let token = interrupts.token();

    match cli.command {
        Commands::Start { rows, watch } => {
            let cursor = controller.start(rows.to_mode()?).await?;
            println!(
                "Started batch {} over {} rows ({})",
                cursor.batch_id, cursor.total_target, cursor.mode
            );
            if watch {
                watch_until_settled(&scheduler, &token).await?;
            }
        }
        Commands::Continue => {
            let report = scheduler.continue_once(&token).await?;
            output::print_report(&report);
        }
        Commands::Watch => watch_until_settled(&scheduler, &token).await?,
        Commands::Pause => match controller.pause().await? {
            ControlOutcome::Applied => println!("Batch paused."),
            ControlOutcome::Requested => {
                println!("Pause requested; the running invocation stops after its current row.")
            }
        },
        Commands::Resume => {
            let cursor = controller.resume().await?;
            println!(
                "Batch {} resumed; {} rows remaining. Run `continue` or `watch`.",
                cursor.batch_id,
                cursor.remaining()
            );
        }
        Commands::Cancel => match controller.cancel().await? {
            ControlOutcome::Applied => println!("Batch cancelled."),
            ControlOutcome::Requested => {
                println!("Cancel requested; the running invocation stops after its current row.")
            }
        },
        Commands::Status { json } => {
            let status = controller.status().await?;
            if json {
                output::print_json(&status)?;
            } else {
                output::print_status(&status);
            }
        }
        Commands::Failures { json } => {
            let failures = controller.failures().await?;
            if json {
                output::print_json(&failures)?;
            } else {
                output::print_failures(&failures);
            }
        }
        Commands::RetryFailed { watch } => {
            let cursor = controller.retry_failed().await?;
            println!(
                "Started batch {} over {} failed rows",
                cursor.batch_id, cursor.total_target
            );
            if watch {
                watch_until_settled(&scheduler, &token).await?;
            }
        }
        Commands::Unlock => {
            controller.force_unlock().await?;
            println!("Invocation lock released.");
        }
    }

    Ok(())
}

fn load_env(env_file: Option<&Path>) -> Result<EnvManager, CliError> {
    let mut env = EnvManager::from_process();
    match env_file {
        Some(path) => env.load_from_file(path)?,
        None if Path::new(".env").is_file() => env.load_from_file(".env")?,
        None => {}
    }
    Ok(env)
}

/// Runs invocations until the batch settles, printing row events as they
/// arrive.
async fn watch_until_settled(
    scheduler: &ContinuationScheduler,
    token: &CancellationToken,
) -> Result<(), CliError> {
    let events = scheduler.controller().events().clone();
    let (subscription, mut rx) = events.subscribe(256).await;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            output::print_event(&event);
        }
    });

    let result = scheduler.run_until_settled(token).await;

    events.unsubscribe(subscription).await;
    if let Err(err) = printer.await {
        error!(error = %err, "Event printer stopped unexpectedly");
    }

    output::print_settled(&result?);
    Ok(())
}
