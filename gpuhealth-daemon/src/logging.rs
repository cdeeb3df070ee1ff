//! Logging initialization for gpuhealthd.
//!
//! The effective filter and format come from three layers, highest first:
//!
//! 1. `--log-level` / `--log-format` flags
//! 2. `RUST_LOG` (filter only)
//! 3. the `[general]` section of `GpuhealthConfig`, which already carries
//!    `GPUHEALTH_GENERAL_LOG_*` environment overrides
//!
//! Output goes to stderr so `gpuhealthd dump` keeps stdout to JSON lines.

use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gpuhealth_core::config::GeneralConfig;

use crate::cli::DaemonCli;

/// Directives appended to a plain level filter.
///
/// sqlx logs every statement at debug.
const QUIET_DIRECTIVES: &[&str] = &["sqlx=warn"];

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-parseable JSON lines (default for production)
    Json,
    /// Human-readable multi-line output (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            )),
        }
    }
}

/// Logging flags given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOverrides {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl LogOverrides {
    pub fn from_cli(cli: &DaemonCli) -> Self {
        Self {
            level: cli.log_level.clone(),
            format: cli.log_format.clone(),
        }
    }

    /// Write the overrides into `general` so config validation sees them.
    pub fn apply(&self, general: &mut GeneralConfig) {
        if let Some(level) = &self.level {
            general.log_level.clone_from(level);
        }
        if let Some(format) = &self.format {
            general.log_format.clone_from(format);
        }
    }
}

/// Resolved filter directives and output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub format: LogFormat,
}

impl LogSettings {
    /// Resolve settings from the config, CLI overrides and a `RUST_LOG` value.
    ///
    /// A blank or unparseable `RUST_LOG` is ignored.
    pub fn resolve(
        general: &GeneralConfig,
        overrides: &LogOverrides,
        rust_log: Option<&str>,
    ) -> Result<Self> {
        let format = overrides
            .format
            .as_deref()
            .unwrap_or(&general.log_format)
            .parse()?;

        let rust_log = rust_log
            .map(str::trim)
            .filter(|s| !s.is_empty() && EnvFilter::try_new(s).is_ok());
        let filter = match (overrides.level.as_deref(), rust_log) {
            (Some(level), _) => level_filter(level),
            (None, Some(directives)) => directives.to_owned(),
            (None, None) => level_filter(&general.log_level),
        };

        Ok(Self { filter, format })
    }

    /// [`LogSettings::resolve`] with `RUST_LOG` read from the process environment.
    pub fn from_env(general: &GeneralConfig, overrides: &LogOverrides) -> Result<Self> {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        Self::resolve(general, overrides, rust_log.as_deref())
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .with_context(|| format!("invalid log filter '{}'", self.filter))
    }
}

fn level_filter(level: &str) -> String {
    std::iter::once(level)
        .chain(QUIET_DIRECTIVES.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
pub fn init_tracing(settings: &LogSettings) -> Result<()> {
    let registry = tracing_subscriber::registry().with(settings.env_filter()?);

    match settings.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| {
        anyhow::anyhow!(
            "failed to initialize {:?} tracing subscriber: {}",
            settings.format,
            e
        )
    })
}
