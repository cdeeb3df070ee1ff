//! Orchestrator integration tests.
//!
//! Tests the full flow: config -> store/bucket/watcher build -> run -> shutdown.
//! The kmsg device is disabled so the tests run without root.

use std::path::PathBuf;
use std::time::Duration;

use gpuhealth_core::config::{GpuhealthConfig, MatchRuleConfig};
use gpuhealth_daemon::orchestrator::Orchestrator;
use gpuhealth_eventstore::Bucket;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Build a config that keeps all state under `dir`.
fn test_config(dir: &TempDir) -> GpuhealthConfig {
    let mut config = GpuhealthConfig::default();
    config.general.data_dir = dir.path().join("data").display().to_string();
    config.general.pid_file = String::new();
    config.kmsg.enabled = false;
    config
}

fn pid_path(dir: &TempDir) -> PathBuf {
    dir.path().join("run").join("gpuhealthd.pid")
}

#[tokio::test]
async fn test_build_creates_database_under_data_dir() {
    // Given: A config with kmsg disabled
    let dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&dir);

    // When: Building the orchestrator
    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("build should succeed");

    // Then: The database exists and the watcher is a no-op
    assert!(dir.path().join("data").join("gpuhealth.state").exists());
    assert!(orchestrator.is_kmsg_noop());
    assert_eq!(orchestrator.bucket().name(), "kmsg");
    assert!(orchestrator.bucket().latest().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unavailable_device_degrades_to_noop() {
    // Given: kmsg enabled but pointing at a device that does not exist
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.kmsg.enabled = true;
    config.kmsg.device_path = dir.path().join("no-such-kmsg").display().to_string();

    // When: Building the orchestrator
    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("build should not fail on a missing device");

    // Then: The watcher is a no-op
    assert!(orchestrator.is_kmsg_noop());
}

#[tokio::test]
async fn test_invalid_rule_fails_build() {
    // Given: A rule with an invalid regular expression
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.kmsg.rules = vec![MatchRuleConfig {
        name: "broken".to_owned(),
        pattern: "(unclosed".to_owned(),
    }];

    // When: Building the orchestrator
    let result = Orchestrator::build_from_config(config).await;

    // Then: Build fails validation before any storage is opened
    let err = result.err().expect("build should fail").to_string();
    assert!(err.contains("invalid regex"), "{err}");
    assert!(!dir.path().join("data").exists());
}

#[tokio::test]
async fn test_invalid_config_fails_build() {
    // Given: A config with an empty bucket name
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.kmsg.enabled = true;
    config.kmsg.bucket = String::new();

    // When / Then: Build fails validation
    assert!(Orchestrator::build_from_config(config).await.is_err());
}

#[tokio::test]
async fn test_run_until_shutdown_manages_pid_file() {
    // Given: An orchestrator with a PID file under the temp dir
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = test_config(&dir);
    config.general.pid_file = pid_path(&dir).display().to_string();
    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("build should succeed");

    // When: Running until a shutdown trigger fires
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(orchestrator.run_until(async {
        let _ = shutdown_rx.await;
    }));

    let pid_file = pid_path(&dir);
    let mut written = false;
    for _ in 0..100 {
        if pid_file.exists() {
            written = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(written, "PID file should be written while running");

    shutdown_tx.send(()).expect("daemon should be waiting");
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("shutdown should complete promptly")
        .expect("task should not panic");

    // Then: Clean shutdown and the PID file is removed
    assert!(result.is_ok(), "shutdown should be clean: {result:?}");
    assert!(!pid_file.exists(), "PID file should be removed");
}

#[tokio::test]
async fn test_run_fails_when_pid_file_exists() {
    // Given: A PID file left by another instance
    let dir = TempDir::new().expect("should create temp dir");
    let pid_file = pid_path(&dir);
    std::fs::create_dir_all(pid_file.parent().unwrap()).unwrap();
    std::fs::write(&pid_file, "4242\n").unwrap();

    let mut config = test_config(&dir);
    config.general.pid_file = pid_file.display().to_string();
    let orchestrator = Orchestrator::build_from_config(config)
        .await
        .expect("build should succeed");

    // When: Running
    let result = orchestrator.run_until(std::future::pending()).await;

    // Then: Startup fails and the other instance's PID file is kept
    assert!(result.is_err());
    assert_eq!(std::fs::read_to_string(&pid_file).unwrap(), "4242\n");
}

#[tokio::test]
async fn test_restart_reuses_existing_database() {
    // Given: A database created by a previous run
    let dir = TempDir::new().expect("should create temp dir");
    let first = Orchestrator::build_from_config(test_config(&dir))
        .await
        .expect("first build");
    first.run_until(async {}).await.expect("first run");

    // When: Building again against the same data dir
    let second = Orchestrator::build_from_config(test_config(&dir)).await;

    // Then: The existing database opens cleanly
    assert!(second.is_ok());
}

#[tokio::test]
async fn test_build_from_config_file() {
    // Given: A config file pointing the database into the temp dir
    let dir = TempDir::new().expect("should create temp dir");
    let db_file = dir.path().join("state").join("events.db");
    let config_path = dir.path().join("gpuhealth.toml");
    let toml_str = format!(
        r#"
[general]
pid_file = ""

[kmsg]
enabled = false
bucket = "kmsg-file"

[event_store]
db_file = "{}"
retention_secs = 0
"#,
        db_file.display()
    );
    std::fs::write(&config_path, toml_str).expect("should write config");

    // When: Building from the file
    let orchestrator = Orchestrator::build(&config_path)
        .await
        .expect("build should succeed");

    // Then: File values are used
    assert_eq!(orchestrator.config().kmsg.bucket, "kmsg-file");
    assert_eq!(
        orchestrator.bucket().table(),
        "components_kmsg_file_events_v0_4_0"
    );
    assert!(db_file.exists());
}
