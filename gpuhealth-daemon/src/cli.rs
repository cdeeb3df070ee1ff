//! CLI argument definitions for gpuhealthd.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default configuration file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "gpuhealth.toml";

/// GPU health daemon.
///
/// Follows the kernel ring buffer, matches GPU-related kernel messages
/// and records them as events in the local SQLite store.
#[derive(Parser, Debug)]
#[command(name = "gpuhealthd")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to gpuhealth.toml configuration file.
    ///
    /// When the default file does not exist, built-in defaults are used.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl DaemonCli {
    /// Whether `--config` was left at its default value.
    pub fn uses_default_config(&self) -> bool {
        self.config.as_os_str() == DEFAULT_CONFIG_PATH
    }
}

/// Daemon subcommands. `run` is the default.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow the kernel ring buffer and record matched events.
    Run,
    /// Read every record currently in the ring buffer and print it as JSON lines.
    Dump,
    /// Write a message into the kernel ring buffer.
    Inject {
        /// Kernel log priority (KERN_ERR, kern.warn, ...).
        #[arg(short, long, default_value = "KERN_INFO")]
        priority: String,
        /// Message text.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run_with_default_config() {
        let cli = DaemonCli::try_parse_from(["gpuhealthd"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.uses_default_config());
        assert!(!cli.validate);
    }

    #[test]
    fn parses_overrides() {
        let cli = DaemonCli::try_parse_from([
            "gpuhealthd",
            "--config",
            "/etc/gpuhealth/gpuhealth.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--pid-file",
            "/tmp/gpuhealthd.pid",
            "run",
        ])
        .unwrap();
        assert!(!cli.uses_default_config());
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert_eq!(cli.pid_file.as_deref(), Some("/tmp/gpuhealthd.pid"));
        assert_eq!(cli.command, Some(Command::Run));
    }

    #[test]
    fn parses_inject() {
        let cli =
            DaemonCli::try_parse_from(["gpuhealthd", "inject", "--priority", "KERN_ERR", "hello"])
                .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Inject {
                priority: "KERN_ERR".to_owned(),
                message: "hello".to_owned(),
            })
        );
    }

    #[test]
    fn inject_requires_message() {
        assert!(DaemonCli::try_parse_from(["gpuhealthd", "inject"]).is_err());
    }
}
