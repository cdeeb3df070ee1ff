use anyhow::Result;
use clap::Parser;

use gpuhealth_daemon::cli::{Command, DaemonCli};
use gpuhealth_daemon::logging::{LogOverrides, LogSettings};
use gpuhealth_daemon::orchestrator::{Orchestrator, load_config};
use gpuhealth_daemon::{commands, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = load_config(&cli.config, cli.uses_default_config()).await?;

    // CLI flags take precedence over the config file and environment variables.
    let log_overrides = LogOverrides::from_cli(&cli);
    log_overrides.apply(&mut config.general);
    if let Some(pid_file) = cli.pid_file {
        config.general.pid_file = pid_file;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    if cli.validate {
        println!("configuration is valid: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&LogSettings::from_env(&config.general, &log_overrides)?)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "gpuhealthd starting");
            let orchestrator = Orchestrator::build_from_config(config).await?;
            orchestrator.run().await
        }
        Command::Dump => {
            let count = commands::dump(&config.kmsg.device_path).await?;
            tracing::debug!(count = count, "kmsg dump complete");
            Ok(())
        }
        Command::Inject { priority, message } => {
            commands::inject(&config.kmsg.device_path, &priority, &message)
        }
    }
}
