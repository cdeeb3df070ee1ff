//! 이벤트 저장소 에러 타입

use gpuhealth_core::error::{GpuhealthError, StorageError};

/// 이벤트 저장소 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// SQLite 연결 또는 쿼리 실패
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// extra_info / suggested_actions 직렬화 실패
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 테이블 이름에 허용되지 않는 문자가 포함됨
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    /// 저장된 타임스탬프를 시각으로 변환할 수 없음
    #[error("invalid timestamp in row: {0}")]
    InvalidTimestamp(i64),

    /// 작업 시간 초과
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl From<EventStoreError> for GpuhealthError {
    fn from(err: EventStoreError) -> Self {
        let storage = match &err {
            EventStoreError::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_),
            ) => StorageError::Connection(err.to_string()),
            _ => StorageError::Query(err.to_string()),
        };
        GpuhealthError::Storage(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_table_name_display() {
        let err = EventStoreError::InvalidTableName("bad;name".to_owned());
        assert_eq!(err.to_string(), "invalid table name: \"bad;name\"");
    }

    #[test]
    fn timeout_converts_to_query_error() {
        let err: GpuhealthError = EventStoreError::Timeout("create table").into();
        assert!(matches!(
            err,
            GpuhealthError::Storage(StorageError::Query(ref s)) if s == "create table timed out"
        ));
    }

    #[test]
    fn pool_closed_converts_to_connection_error() {
        let err: GpuhealthError = EventStoreError::Database(sqlx::Error::PoolClosed).into();
        assert!(matches!(
            err,
            GpuhealthError::Storage(StorageError::Connection(_))
        ));
    }
}
