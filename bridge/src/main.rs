mod config;
mod supervisor;
mod telemetry;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use notice_forwarder::config::ValidationError;
use std::path::{Path, PathBuf};
use supervisor::Supervisor;
use telemetry::TelemetryError;

/// Process exit status when the configuration cannot be loaded.
const CONFIG_FAILURE_EXIT_CODE: i32 = 1;

#[derive(Parser)]
#[command(version, about = "Accepts Airbrake notices and relays them to Airbrake and Sentry")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum CliCommand {
    /// Start the workers and serve notices
    #[default]
    Run,
    /// Load and validate the configuration, then exit
    ValidateConfig,
}

#[derive(thiserror::Error, Debug)]
enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn load_config(path: &Path) -> Result<Config, BridgeError> {
    let config = Config::from_file(path)?;
    config.forwarder.validate()?;
    Ok(config)
}

fn run(config: Config) -> Result<(), BridgeError> {
    let _sentry = telemetry::init_logging(config.logging.as_ref());

    if let Some(metrics) = &config.metrics {
        telemetry::init_metrics(metrics)?;
    }

    let listener_config = &config.forwarder.listener;
    let listener = supervisor::bind(&listener_config.host, listener_config.port)?;
    let workers = listener_config.workers.unwrap_or_else(num_cpus::get);

    tracing::info!(
        host = %listener_config.host,
        port = listener_config.port,
        workers,
        "Starting notice bridge"
    );

    Supervisor::new(listener, workers).run(supervisor::forwarder_worker(config.forwarder))?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Could not load configuration from {}: {e}",
                cli.config.display()
            );
            std::process::exit(CONFIG_FAILURE_EXIT_CODE);
        }
    };

    match cli.command.unwrap_or_default() {
        CliCommand::ValidateConfig => {
            println!("Configuration at {} is valid", cli.config.display());
        }
        CliCommand::Run => {
            if let Err(e) = run(config) {
                tracing::error!(error = %e, "Notice bridge stopped");
                eprintln!("Notice bridge stopped: {e}");
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn cli_definition() {
        Cli::command().debug_assert();

        let cli = Cli::parse_from(["bridge", "--config", "/etc/bridge.yaml", "validate-config"]);
        assert_eq!(cli.config, PathBuf::from("/etc/bridge.yaml"));
        assert!(matches!(cli.command, Some(CliCommand::ValidateConfig)));

        let cli = Cli::parse_from(["bridge"]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert!(matches!(cli.command.unwrap_or_default(), CliCommand::Run));
    }

    #[test]
    fn load_config_validates() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "listener: {{port: 0}}\nairbrake: {{}}\n").expect("write yaml");
        assert!(matches!(
            load_config(tmp.path()),
            Err(BridgeError::Validation(ValidationError::InvalidPort))
        ));

        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "store: {{type: memory}}\n").expect("write yaml");
        assert!(matches!(
            load_config(tmp.path()),
            Err(BridgeError::Validation(ValidationError::NoBackend))
        ));

        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "store: {{type: memory}}\nairbrake: {{}}\n").expect("write yaml");
        assert!(load_config(tmp.path()).is_ok());
    }
}
