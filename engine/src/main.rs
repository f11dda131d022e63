// Loom planning assistant
// Main entry point for the loom binary

use clap::Parser;
use loom_engine::cli::{Cli, Command};
use loom_engine::config::Config;
use loom_engine::handlers::{
    handle_doctor, handle_entities, handle_lessons, handle_run, OutputFormat,
};
use loom_engine::telemetry;
use sdk::errors::{exit_codes, CoreError, CoreErrorExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {} ({})", e, e.user_hint());
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    // Telemetry comes up once the level is known: CLI flag wins over config
    let level = cli.log.clone().unwrap_or_else(|| config.core.log_level.clone());
    telemetry::init(Some(&level));

    let memory_override = cli.memory.as_deref();

    let result = match cli.command {
        Command::Run {
            goal,
            entities,
            max_iterations,
            auto_approve,
        } => {
            tracing::info!("Starting session for goal: {}", goal);
            handle_run(
                goal,
                entities,
                max_iterations,
                auto_approve,
                &config,
                memory_override,
                format,
            )
            .await
        }

        Command::Entities => handle_entities(&config, memory_override, format).await,

        Command::Lessons { domain, limit } => {
            handle_lessons(domain, limit, &config, memory_override, format).await
        }

        Command::Doctor => handle_doctor(&config, memory_override, format).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e @ (CoreError::ConfigMissing(_) | CoreError::CredentialMissing(_))) => {
            eprintln!("Configuration error: {} ({})", e, e.user_hint());
            exit_codes::CONFIG_ERROR
        }
        Err(e) => {
            eprintln!("Error: {} ({})", e, e.user_hint());
            exit_codes::INTERNAL_ERROR
        }
    };

    std::process::exit(code);
}

fn load_config(cli: &Cli) -> Result<Config, CoreError> {
    match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load_or_create(),
    }
}
