//! 커널 메시지 에러 타입
//!
//! [`ParseError`]는 레코드 한 줄의 형식 오류를, [`KmsgError`]는 읽기/감시/쓰기
//! 전반의 에러를 표현합니다. `From<KmsgError> for GpuhealthError` 변환이 구현되어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use gpuhealth_core::error::GpuhealthError;

/// 레코드 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// 구분자 누락 또는 메타데이터 필드 부족
    #[error("{reason}")]
    InvalidFormat {
        /// 실패 사유
        reason: &'static str,
    },

    /// 숫자 필드 파싱 실패
    #[error("invalid kmsg: failed to parse {field} from {value:?}")]
    MalformedField {
        /// 필드 이름 (priority, sequence_number, timestamp)
        field: &'static str,
        /// 원본 값
        value: String,
    },
}

/// 커널 메시지 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum KmsgError {
    /// 디바이스에서 읽은 레코드가 형식에 맞지 않음
    #[error("malformed kmsg message {line:?}: {source}")]
    Malformed {
        /// 문제가 된 레코드
        line: String,
        /// 파싱 에러
        #[source]
        source: ParseError,
    },

    /// 이미 시작된 감시자에 대한 재호출
    #[error("watcher already started")]
    AlreadyStarted,

    /// 부팅 시각 조회 실패
    #[error("failed to determine boot time: {0}")]
    BootTime(String),

    /// 커널 메시지 길이 초과
    #[error("message length exceeds the maximum length of {max}")]
    MessageTooLong {
        /// 실제 길이 (바이트)
        len: usize,
        /// 허용 길이 (바이트)
        max: usize,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 백그라운드 태스크 실패 (panic 또는 취소)
    #[error("task failed: {0}")]
    Task(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<KmsgError> for GpuhealthError {
    fn from(err: KmsgError) -> Self {
        match err {
            KmsgError::Io(e) => GpuhealthError::Io(e),
            other => GpuhealthError::Kmsg(other.to_string()),
        }
    }
}
