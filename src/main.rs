//! Taskava engine CLI
//!
//! Thin command-line front end over the engine library. Every command prints
//! JSON on stdout; failures print the error kind and message on stderr.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use taskava_engine::cli::{self, Cli};
use taskava_engine::config::Config;
use taskava_engine::db::Database;
use taskava_engine::error::EngineError;
use taskava_engine::logging::{self, LogTarget};
use tracing::debug;

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)?;
            config.apply_env();
            config
        }
        None => Config::load_or_default()?,
    };

    // Override paths from CLI arguments
    if let Some(db_path) = &cli.database {
        config.store.db_path = db_path.into();
    }
    config.ensure_db_dir()?;
    debug!(db_path = %config.store.db_path.display(), "opening database");

    let db = Database::from_config(&config)?;
    let ctx = cli.tenant()?;

    let output = cli::run(&db, &ctx, cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, &LogTarget::parse(&cli.log)) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<EngineError>() {
                Some(engine) => eprintln!("error [{}]: {}", engine.kind(), engine),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}
