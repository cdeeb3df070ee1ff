//! 버킷 — 논리 소스 하나가 소유하는 이벤트 테이블
//!
//! 쓰기는 단일 커넥션 RW 풀로, 읽기는 RO 풀로 보냅니다. 보존 기간이
//! 1초 이상이면 버킷마다 백그라운드 정리 태스크가 하나 돌며 `close()`로 멈춥니다.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gpuhealth_core::metrics as m;
use gpuhealth_core::types::{Event, EventType};
use metrics::{counter, histogram};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec;
use crate::error::EventStoreError;

/// 테이블 스키마 버전 접미사
pub const SCHEMA_VERSION: &str = "v0_4_0";

/// 테이블 생성 제한 시간
pub const CREATE_TABLE_TIMEOUT: Duration = Duration::from_secs(10);

const COLUMN_TIMESTAMP: &str = "timestamp";
const COLUMN_NAME: &str = "name";
const COLUMN_TYPE: &str = "type";
const COLUMN_MESSAGE: &str = "message";
const COLUMN_EXTRA_INFO: &str = "extra_info";
const COLUMN_SUGGESTED_ACTIONS: &str = "suggested_actions";

const SELECT_COLUMNS: &str = "timestamp, name, type, message, extra_info, suggested_actions";

/// 이벤트 버킷 인터페이스
///
/// 싱커와 테스트 더블이 이 trait에 대해 동작합니다. 모든 조회/쓰기 에러는
/// 호출자에게 그대로 전달됩니다.
pub trait Bucket: Send + Sync + 'static {
    /// 버킷 이름
    fn name(&self) -> &str;

    /// 이벤트를 추가합니다.
    fn insert(&self, ev: &Event) -> impl Future<Output = Result<(), EventStoreError>> + Send;

    /// 같은 이벤트를 찾습니다. 여러 개면 첫 번째를 반환합니다.
    ///
    /// `time`, `name`, `type`은 항상 비교하고, `message`와 `extra_info`는 비어
    /// 있지 않을 때, `suggested_actions`는 있을 때만 비교합니다.
    fn find(
        &self,
        ev: &Event,
    ) -> impl Future<Output = Result<Option<Event>, EventStoreError>> + Send;

    /// `since` 이후(초과) 이벤트를 최신순으로 반환합니다. 없으면 `None`.
    fn get(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Vec<Event>>, EventStoreError>> + Send;

    /// 가장 최근 이벤트를 반환합니다.
    fn latest(&self) -> impl Future<Output = Result<Option<Event>, EventStoreError>> + Send;

    /// `before_ts`(유닉스 초) 미만의 이벤트를 지우고 삭제 건수를 반환합니다.
    fn purge(&self, before_ts: i64) -> impl Future<Output = Result<u64, EventStoreError>> + Send;

    /// 백그라운드 정리를 멈춥니다. 여러 번 호출해도 안전합니다.
    fn close(&self);
}

/// 버킷 이름을 테이블 이름으로 변환합니다.
///
/// 공백과 `-`는 `_`로 바꾸고 `__`를 한 번 `_`로 줄인 뒤 소문자로 만듭니다.
/// 테이블 이름은 SQL에 그대로 들어가므로 `[a-z0-9_]` 외의 문자는 거부합니다.
pub fn table_name(name: &str) -> Result<String, EventStoreError> {
    let normalized = name
        .replace(' ', "_")
        .replace('-', "_")
        .replace("__", "_")
        .to_lowercase();

    if !normalized
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(EventStoreError::InvalidTableName(name.to_owned()));
    }

    Ok(format!("components_{normalized}_events_{SCHEMA_VERSION}"))
}

/// SQLite 테이블 기반 버킷
pub struct SqliteBucket {
    name: String,
    table: String,
    rw: SqlitePool,
    ro: SqlitePool,
    cancel: CancellationToken,
}

impl SqliteBucket {
    /// 테이블과 인덱스를 만들고, 보존 기간이 1초 이상이면 정리 태스크를 띄웁니다.
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub async fn open(
        rw: SqlitePool,
        ro: SqlitePool,
        name: &str,
        retention: Duration,
    ) -> Result<Self, EventStoreError> {
        let table = table_name(name)?;

        tokio::time::timeout(CREATE_TABLE_TIMEOUT, create_table(&rw, &table))
            .await
            .map_err(|_| EventStoreError::Timeout("create table"))??;

        let cancel = CancellationToken::new();
        if retention >= Duration::from_secs(1) {
            let check_interval = (retention / 5).max(Duration::from_secs(1));
            tokio::spawn(run_purge(
                rw.clone(),
                table.clone(),
                retention,
                check_interval,
                cancel.clone(),
            ));
        }

        debug!(bucket = name, table = %table, "bucket opened");
        Ok(Self {
            name: name.to_owned(),
            table,
            rw,
            ro,
            cancel,
        })
    }

    /// 실제 테이블 이름
    pub fn table(&self) -> &str {
        &self.table
    }

    /// `close()`가 호출되었는지 여부
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Bucket for SqliteBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, ev: &Event) -> Result<(), EventStoreError> {
        insert_event(&self.rw, &self.table, ev).await
    }

    async fn find(&self, ev: &Event) -> Result<Option<Event>, EventStoreError> {
        find_event(&self.ro, &self.table, ev).await
    }

    async fn get(&self, since: DateTime<Utc>) -> Result<Option<Vec<Event>>, EventStoreError> {
        get_events(&self.ro, &self.table, since).await
    }

    async fn latest(&self) -> Result<Option<Event>, EventStoreError> {
        latest_event(&self.ro, &self.table).await
    }

    async fn purge(&self, before_ts: i64) -> Result<u64, EventStoreError> {
        purge_events(&self.rw, &self.table, before_ts).await
    }

    fn close(&self) {
        info!(table = %self.table, "closing the store");
        self.cancel.cancel();
    }
}

impl Drop for SqliteBucket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn create_table(db: &SqlitePool, table: &str) -> Result<(), EventStoreError> {
    let mut tx = db.begin().await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    {COLUMN_TIMESTAMP} INTEGER NOT NULL,
    {COLUMN_NAME} TEXT NOT NULL,
    {COLUMN_TYPE} TEXT NOT NULL,
    {COLUMN_MESSAGE} TEXT,
    {COLUMN_EXTRA_INFO} TEXT,
    {COLUMN_SUGGESTED_ACTIONS} TEXT
)"
    ))
    .execute(&mut *tx)
    .await?;

    for column in [COLUMN_TIMESTAMP, COLUMN_NAME, COLUMN_TYPE] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})"
        ))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn insert_event(db: &SqlitePool, table: &str, ev: &Event) -> Result<(), EventStoreError> {
    let extra_info = codec::encode_extra_info(&ev.extra_info)?;
    let suggested_actions = codec::encode_suggested_actions(ev.suggested_actions.as_ref())?;

    let sql = format!(
        "INSERT INTO {table} ({SELECT_COLUMNS}) VALUES (?, ?, ?, NULLIF(?, ''), NULLIF(?, ''), NULLIF(?, ''))"
    );

    let start = Instant::now();
    let result = sqlx::query(&sql)
        .bind(ev.time.timestamp())
        .bind(ev.name.as_str())
        .bind(ev.event_type.as_str())
        .bind(ev.message.as_str())
        .bind(extra_info)
        .bind(suggested_actions)
        .execute(db)
        .await;
    histogram!(m::EVENTSTORE_INSERT_DURATION_SECONDS, m::LABEL_TABLE => table.to_owned())
        .record(start.elapsed().as_secs_f64());

    result?;
    Ok(())
}

async fn find_event(
    db: &SqlitePool,
    table: &str,
    ev: &Event,
) -> Result<Option<Event>, EventStoreError> {
    let extra_info = codec::encode_extra_info(&ev.extra_info)?;
    let suggested_actions = codec::encode_suggested_actions(ev.suggested_actions.as_ref())?;

    let mut sql = format!(
        "SELECT {SELECT_COLUMNS} FROM {table} WHERE {COLUMN_TIMESTAMP} = ? AND {COLUMN_NAME} = ? AND {COLUMN_TYPE} = ?"
    );
    if !ev.message.is_empty() {
        sql.push_str(&format!(" AND {COLUMN_MESSAGE} = ?"));
    }
    if !extra_info.is_empty() {
        sql.push_str(&format!(" AND {COLUMN_EXTRA_INFO} = ?"));
    }
    if !suggested_actions.is_empty() {
        sql.push_str(&format!(" AND {COLUMN_SUGGESTED_ACTIONS} = ?"));
    }
    sql.push_str(" LIMIT 1");

    let mut query = sqlx::query(&sql)
        .bind(ev.time.timestamp())
        .bind(ev.name.as_str())
        .bind(ev.event_type.as_str());
    if !ev.message.is_empty() {
        query = query.bind(ev.message.as_str());
    }
    if !extra_info.is_empty() {
        query = query.bind(extra_info.as_str());
    }
    if !suggested_actions.is_empty() {
        query = query.bind(suggested_actions.as_str());
    }

    let start = Instant::now();
    let row = query.fetch_optional(db).await;
    record_select(table, start);

    row?.as_ref().map(decode_row).transpose()
}

async fn get_events(
    db: &SqlitePool,
    table: &str,
    since: DateTime<Utc>,
) -> Result<Option<Vec<Event>>, EventStoreError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM {table} WHERE {COLUMN_TIMESTAMP} > ? ORDER BY {COLUMN_TIMESTAMP} DESC"
    );

    let start = Instant::now();
    let rows = sqlx::query(&sql)
        .bind(since.timestamp())
        .fetch_all(db)
        .await;
    record_select(table, start);

    let events = rows?
        .iter()
        .map(decode_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((!events.is_empty()).then_some(events))
}

async fn latest_event(db: &SqlitePool, table: &str) -> Result<Option<Event>, EventStoreError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM {table} ORDER BY {COLUMN_TIMESTAMP} DESC LIMIT 1"
    );

    let start = Instant::now();
    let row = sqlx::query(&sql).fetch_optional(db).await;
    record_select(table, start);

    row?.as_ref().map(decode_row).transpose()
}

async fn purge_events(db: &SqlitePool, table: &str, before_ts: i64) -> Result<u64, EventStoreError> {
    let sql = format!("DELETE FROM {table} WHERE {COLUMN_TIMESTAMP} < ?");

    let start = Instant::now();
    let result = sqlx::query(&sql).bind(before_ts).execute(db).await?;
    histogram!(m::EVENTSTORE_DELETE_DURATION_SECONDS, m::LABEL_TABLE => table.to_owned())
        .record(start.elapsed().as_secs_f64());

    let purged = result.rows_affected();
    counter!(m::EVENTSTORE_PURGED_TOTAL, m::LABEL_TABLE => table.to_owned()).increment(purged);
    Ok(purged)
}

fn record_select(table: &str, start: Instant) {
    histogram!(m::EVENTSTORE_SELECT_DURATION_SECONDS, m::LABEL_TABLE => table.to_owned())
        .record(start.elapsed().as_secs_f64());
}

fn decode_row(row: &SqliteRow) -> Result<Event, EventStoreError> {
    let timestamp: i64 = row.try_get(COLUMN_TIMESTAMP)?;
    let name: String = row.try_get(COLUMN_NAME)?;
    let event_type: String = row.try_get(COLUMN_TYPE)?;
    let message: Option<String> = row.try_get(COLUMN_MESSAGE)?;
    let extra_info: Option<String> = row.try_get(COLUMN_EXTRA_INFO)?;
    let suggested_actions: Option<String> = row.try_get(COLUMN_SUGGESTED_ACTIONS)?;

    let time = DateTime::from_timestamp(timestamp, 0)
        .ok_or(EventStoreError::InvalidTimestamp(timestamp))?;

    Ok(Event {
        time,
        name,
        event_type: EventType::from_str_lossy(&event_type),
        message: message.unwrap_or_default(),
        extra_info: codec::decode_extra_info(extra_info.as_deref()),
        suggested_actions: codec::decode_suggested_actions(suggested_actions.as_deref()),
    })
}

async fn run_purge(
    rw: SqlitePool,
    table: String,
    retention: Duration,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        table = %table,
        retention_secs = retention.as_secs(),
        check_interval_secs = check_interval.as_secs(),
        "start purging"
    );
    let retention_secs = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(table = %table, "purge loop stopped");
                return;
            }
            _ = tokio::time::sleep(check_interval) => {}
        }

        let before = Utc::now().timestamp().saturating_sub(retention_secs);
        match purge_events(&rw, &table, before).await {
            Ok(purged) => info!(table = %table, purged, "purged data"),
            Err(e) => error!(table = %table, error = %e, "failed to purge data"),
        }
    }
}
