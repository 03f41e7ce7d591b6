use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ft_cli::commands::{delete, open_database, replay, run, sessions, show, status};
use ft_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so stdout stays machine-readable with --json.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = io::stdout().lock();
    match &cli.command {
        Some(Commands::Replay {
            file,
            json,
            no_save,
        }) => {
            replay::run(&mut stdout, &config, file, *json, !*no_save)?;
        }
        Some(Commands::Run { json, no_save }) => {
            run::run(&mut stdout, &config, *json, !*no_save)?;
        }
        Some(Commands::Sessions { json }) => {
            let db = open_database(&config)?;
            sessions::run(&mut stdout, &db, *json)?;
        }
        Some(Commands::Show { session_id, json }) => {
            let db = open_database(&config)?;
            show::run(&mut stdout, &db, session_id, *json)?;
        }
        Some(Commands::Delete { session_id }) => {
            let mut db = open_database(&config)?;
            delete::run(&mut stdout, &mut db, session_id)?;
        }
        Some(Commands::Status) => {
            let db = open_database(&config)?;
            status::run(&mut stdout, &db, &config)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
