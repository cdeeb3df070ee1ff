//! 메트릭 상수
//!
//! 모든 메트릭의 이름을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//! 익스포터 등록은 이 저장소의 범위 밖이며, 레코더가 설치되지 않으면 기록은 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `gpuhealth_`
//! - 모듈명: `kmsg_`, `eventstore_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(gpuhealth_core::metrics::KMSG_MESSAGES_READ_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 테이블 레이블 키
pub const LABEL_TABLE: &str = "table";

// ─── kmsg 메트릭 ───────────────────────────────────────────────────

/// kmsg: 파싱된 레코드 수 (counter)
pub const KMSG_MESSAGES_READ_TOTAL: &str = "gpuhealth_kmsg_messages_read_total";

/// kmsg: 중복으로 억제된 메시지 수 (counter)
pub const KMSG_MESSAGES_DEDUPED_TOTAL: &str = "gpuhealth_kmsg_messages_deduped_total";

/// kmsg: 소비자 지연으로 버려진 메시지 수 (counter)
pub const KMSG_MESSAGES_DROPPED_TOTAL: &str = "gpuhealth_kmsg_messages_dropped_total";

/// kmsg: 링 버퍼 오버런(EPIPE) 횟수 (counter)
pub const KMSG_OVERFLOW_TOTAL: &str = "gpuhealth_kmsg_overflow_total";

/// kmsg: 싱커가 저장한 이벤트 수 (counter)
pub const KMSG_SYNCER_EVENTS_INSERTED_TOTAL: &str = "gpuhealth_kmsg_syncer_events_inserted_total";

// ─── Event Store 메트릭 ────────────────────────────────────────────

/// Event Store: INSERT 지연 시간 (histogram, 초)
pub const EVENTSTORE_INSERT_DURATION_SECONDS: &str = "gpuhealth_eventstore_insert_duration_seconds";

/// Event Store: SELECT 지연 시간 (histogram, 초)
pub const EVENTSTORE_SELECT_DURATION_SECONDS: &str = "gpuhealth_eventstore_select_duration_seconds";

/// Event Store: DELETE 지연 시간 (histogram, 초)
pub const EVENTSTORE_DELETE_DURATION_SECONDS: &str = "gpuhealth_eventstore_delete_duration_seconds";

/// Event Store: 보존 기간 만료로 삭제된 행 수 (counter, label: table)
pub const EVENTSTORE_PURGED_TOTAL: &str = "gpuhealth_eventstore_purged_total";
