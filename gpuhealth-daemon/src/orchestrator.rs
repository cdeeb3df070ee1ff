//! Daemon orchestration -- assembly, task wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `gpuhealthd`.
//! It opens the event store, builds the kmsg watcher and the rule matcher,
//! starts the syncer, and runs until a shutdown signal arrives.
//!
//! # Startup Order
//!
//! 1. Event store (SQLite file, RW/RO pools)
//! 2. kmsg bucket (table, indexes, retention purge loop)
//! 3. kmsg watcher (device, or a no-op watcher when the device is unavailable)
//! 4. Syncer (watch task + sync task)
//!
//! # Shutdown Order
//!
//! 1. Syncer close (stop the watcher, let the sync task drain its channel)
//! 2. Syncer wait
//! 3. Bucket close (stop the purge loop)
//! 4. Store close (RO pool, then RW pool)

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use gpuhealth_core::config::GpuhealthConfig;
use gpuhealth_eventstore::{Bucket, SqliteBucket, Store, StoreConfig};
use gpuhealth_kmsg::{
    HostSource, MatchFn, ProcStatBootTime, SyncerBuilder, Watcher, WatcherConfig,
};

use crate::matcher::Matcher;

/// The main daemon orchestrator.
///
/// Owns every long-lived component of the daemon. Nothing runs until
/// [`Orchestrator::run`] (or [`Orchestrator::run_until`]) is called, except
/// the bucket's retention purge loop which starts with the bucket.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: GpuhealthConfig,
    /// Event store shared by all buckets.
    store: Store,
    /// Bucket the syncer writes kmsg events into.
    bucket: Arc<SqliteBucket>,
    /// Kernel ring buffer watcher.
    watcher: Arc<Watcher<HostSource>>,
    /// Compiled `[[kmsg.rules]]`.
    match_fn: MatchFn,
    /// Cancels the sync task on shutdown.
    cancel: CancellationToken,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or
    /// any component fails to initialize.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = GpuhealthConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build the orchestrator from an already-loaded configuration.
    ///
    /// A kmsg device that cannot be opened (non-Linux, non-root) is not an
    /// error: the watcher degrades to a no-op watcher and the daemon keeps
    /// serving the store.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The event store or bucket cannot be opened
    /// - A match rule does not compile
    pub async fn build_from_config(config: GpuhealthConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

        let db_file = config
            .event_store
            .resolve_db_file(&config.general.data_dir);
        ensure_parent_dir(&db_file).await?;

        let store = Store::open(&db_file, StoreConfig::from_core(&config.event_store))
            .await
            .with_context(|| format!("failed to open event store {}", db_file.display()))?;

        let bucket = match store.bucket(&config.kmsg.bucket).await {
            Ok(bucket) => Arc::new(bucket),
            Err(e) => {
                store.close().await;
                return Err(anyhow::anyhow!(
                    "failed to open bucket '{}': {}",
                    config.kmsg.bucket,
                    e
                ));
            }
        };

        let matcher = match Matcher::compile(&config.kmsg.rules) {
            Ok(matcher) => matcher,
            Err(e) => {
                bucket.close();
                store.close().await;
                return Err(e);
            }
        };

        let watcher_config = WatcherConfig::from_core(&config.kmsg);
        let watcher = if config.kmsg.enabled {
            Watcher::open_or_noop(
                &config.kmsg.device_path,
                &ProcStatBootTime::new(),
                watcher_config,
            )
        } else {
            tracing::info!("kmsg watcher disabled by configuration");
            Watcher::noop(watcher_config)
        };

        tracing::info!(
            db_file = %db_file.display(),
            bucket = %config.kmsg.bucket,
            rules = matcher.len(),
            kmsg_noop = watcher.is_noop(),
            "orchestrator built"
        );

        Ok(Self {
            config,
            store,
            bucket,
            watcher: Arc::new(watcher),
            match_fn: matcher.into_match_fn(),
            cancel: CancellationToken::new(),
            start_time: Instant::now(),
        })
    }

    /// Start the syncer and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Start the syncer and run until `shutdown` resolves or the syncer stops
    /// on its own.
    ///
    /// The PID file (if configured) lives exactly as long as this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the PID file cannot be written, the syncer cannot
    /// be started, or the watcher loop ended with an error.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let pid_file = self.pid_file_path();
        if let Some(path) = &pid_file {
            if let Err(e) = write_pid_file(path) {
                self.close_storage().await;
                return Err(e);
            }
        }

        let result = self.run_inner(shutdown).await;

        if let Some(path) = &pid_file {
            remove_pid_file(path);
        }
        result
    }

    async fn run_inner(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!("starting kmsg syncer");
        let syncer = match SyncerBuilder::new(Arc::clone(&self.bucket), Arc::clone(&self.match_fn))
            .watcher(Arc::clone(&self.watcher))
            .op_timeout(self.config.event_store.query_timeout())
            .channel_capacity(self.config.kmsg.channel_capacity)
            .build(self.cancel.clone())
        {
            Ok(syncer) => syncer,
            Err(e) => {
                self.close_storage().await;
                return Err(anyhow::anyhow!("failed to start kmsg syncer: {}", e));
            }
        };

        let watcher = Arc::clone(syncer.watcher());
        let wait = syncer.wait();
        tokio::pin!(wait);

        tracing::info!("gpuhealthd running");
        let sync_result = tokio::select! {
            () = shutdown => {
                tracing::info!("stopping kmsg syncer");
                watcher.close();
                self.cancel.cancel();
                wait.await
            }
            result = &mut wait => {
                tracing::warn!("kmsg syncer stopped before shutdown was requested");
                result
            }
        };

        self.close_storage().await;
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "gpuhealthd shut down"
        );

        sync_result.map_err(|e| anyhow::anyhow!("kmsg watcher failed: {}", e))
    }

    async fn close_storage(&self) {
        self.bucket.close();
        self.store.close().await;
    }

    fn pid_file_path(&self) -> Option<PathBuf> {
        let pid_file = &self.config.general.pid_file;
        (!pid_file.is_empty()).then(|| PathBuf::from(pid_file))
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &GpuhealthConfig {
        &self.config
    }

    /// The bucket kmsg events are recorded into.
    pub fn bucket(&self) -> &Arc<SqliteBucket> {
        &self.bucket
    }

    /// Whether the watcher runs without a device.
    pub fn is_kmsg_noop(&self) -> bool {
        self.watcher.is_noop()
    }
}

/// Load the configuration file.
///
/// When `allow_missing` is set and the file does not exist, built-in
/// defaults are used (with environment overrides still applied).
pub async fn load_config(path: &Path, allow_missing: bool) -> Result<GpuhealthConfig> {
    if allow_missing && !tokio::fs::try_exists(path).await.unwrap_or(false) {
        let mut config = GpuhealthConfig::default();
        config.apply_env_overrides();
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
        return Ok(config);
    }
    GpuhealthConfig::load(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", path.display(), e))
}

async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file
/// - Verifies the created file is a regular file
/// - Creates the parent directory with mode 0o700
///
/// # Errors
///
/// Returns an error if the PID file already exists or cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}
