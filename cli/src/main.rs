mod commands;
mod logging;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use transync::{resolve_config, SyncConfig, SyncError};

#[derive(Parser)]
#[command(author, version, about = "Follow translation jobs from the terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides config and environment
    #[arg(long = "api-url", global = true)]
    api_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the job list in sync and print every change (default)
    Watch,
    /// Fetch the job list once and print it
    List,
    /// Upload files as a new job and follow it until it finishes
    Submit {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn load_settings(cli: &Cli) -> Result<SyncConfig, SyncError> {
    let mut config = resolve_config(cli.config.as_deref())?;
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
        transync::config::validate_config(&config)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.log_json);

    let config = match load_settings(&cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => commands::watch(config).await,
        Commands::List => commands::list(config).await,
        Commands::Submit { files } => commands::submit(config, files).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
