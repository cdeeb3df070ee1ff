//! 이벤트 저장소 — SQLite 파일 하나와 두 커넥션 풀
//!
//! RW 풀은 커넥션 하나로 제한해 모든 쓰기를 풀 수준에서 직렬화하고,
//! RO 풀은 여러 커넥션으로 동시 읽기를 처리합니다.

use std::path::Path;
use std::time::Duration;

use gpuhealth_core::config::EventStoreConfig;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

use crate::bucket::SqliteBucket;
use crate::error::EventStoreError;

/// 저장소 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// 이벤트 보존 기간 (1초 미만이면 자동 정리 비활성)
    pub retention: Duration,
    /// 읽기 전용 커넥션 수
    pub max_read_connections: u32,
    /// SQLite busy 대기 시간
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3 * 24 * 60 * 60),
            max_read_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// core의 `EventStoreConfig`에서 저장소 설정을 생성합니다.
    pub fn from_core(core: &EventStoreConfig) -> Self {
        Self {
            retention: core.retention(),
            max_read_connections: core.max_read_connections,
            busy_timeout: core.query_timeout(),
        }
    }
}

/// SQLite 이벤트 저장소
#[derive(Debug, Clone)]
pub struct Store {
    rw: SqlitePool,
    ro: SqlitePool,
    retention: Duration,
}

impl Store {
    /// 데이터베이스 파일을 열거나 생성합니다.
    pub async fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, EventStoreError> {
        let path = path.as_ref();

        let rw_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        // 쓰기 커넥션은 하나만 유지하며 닫지 않습니다.
        let rw = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(rw_options)
            .await?;

        let ro_options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(config.busy_timeout);

        let ro = SqlitePoolOptions::new()
            .max_connections(config.max_read_connections.max(1))
            .connect_with(ro_options)
            .await?;

        info!(
            path = %path.display(),
            retention_secs = config.retention.as_secs(),
            max_read_connections = config.max_read_connections,
            "event store opened"
        );
        Ok(Self::new(rw, ro, config.retention))
    }

    /// 이미 열린 풀로 저장소를 구성합니다.
    pub fn new(rw: SqlitePool, ro: SqlitePool, retention: Duration) -> Self {
        Self { rw, ro, retention }
    }

    /// 이름에 해당하는 버킷을 열거나 생성합니다.
    pub async fn bucket(&self, name: &str) -> Result<SqliteBucket, EventStoreError> {
        SqliteBucket::open(self.rw.clone(), self.ro.clone(), name, self.retention).await
    }

    /// 보존 기간
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// 쓰기 풀 (관리 도구와 테스트용)
    pub fn rw_pool(&self) -> &SqlitePool {
        &self.rw
    }

    /// 읽기 풀
    pub fn ro_pool(&self) -> &SqlitePool {
        &self.ro
    }

    /// 두 풀을 닫습니다. 읽기 풀을 먼저 닫습니다.
    pub async fn close(&self) {
        self.ro.close().await;
        self.rw.close().await;
        info!("event store closed");
    }
}
