//! verto CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use verto_client::cli::{Cli, Command, ConfigAction};
use verto_client::commands;
use verto_client::config::ClientConfig;
use verto_client::error::{ClientError, ClientResult};
use verto_core::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let mut config = if cli.config.is_some() {
        ClientConfig::load_from(&path).map_err(ClientError::Config)?
    } else {
        ClientConfig::load().map_err(ClientError::Config)?
    };
    cli.apply(&mut config);

    if let Err(e) = init_tracing(config.tracing_config()) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    match cli.command {
        Command::Login => commands::login::run(&config).await,
        Command::Listen { channels } => commands::listen::run(&config, channels).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&path),
        },
    }
}
