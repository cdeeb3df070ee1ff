#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`parser`]: `/dev/kmsg` 레코드 한 줄 파서
//! - [`deduper`]: 시간 창 기반 중복 제거 캐시
//! - [`reader`]: 현재 링 버퍼를 한 번에 읽는 드레인 리더
//! - [`watcher`]: 새 레코드를 채널로 흘려보내는 팔로우 감시자
//! - [`syncer`]: 감시자 메시지를 이벤트 저장소에 기록하는 싱커
//! - [`writer`]: 커널 링 버퍼에 메시지를 주입하는 기록기
//! - [`source`], [`boot_time`]: 플랫폼 I/O 추상화
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! /dev/kmsg -> Watcher (parse + dedup) -> mpsc -> Syncer (match + find/insert) -> Bucket
//!                  |                                   |
//!              drop on send timeout            errors logged, loop continues
//! ```

pub mod boot_time;
pub mod deduper;
#[cfg(unix)]
pub mod device;
pub mod error;
pub mod parser;
pub mod reader;
pub mod source;
pub mod syncer;
pub mod watcher;
pub mod writer;

/// 기본 커널 메시지 디바이스 경로
pub const DEFAULT_DEV_KMSG: &str = "/dev/kmsg";

// --- 주요 타입 re-export ---

// 파서
pub use parser::{Message, parse_line};

// 에러
pub use error::{KmsgError, ParseError};

// 중복 제거
pub use deduper::Deduper;

// 읽기/감시
pub use boot_time::{BootTimeSource, FixedBootTime, ProcStatBootTime};
pub use reader::{drain, read_all};
pub use source::{ChannelSource, NoopSource, RawRecordReader, RecordSource};
pub use watcher::{HostSource, Watcher, WatcherConfig};

// 싱커
pub use syncer::{EXTRA_INFO_KEY_LOG_LINE, MatchFn, SyncOutcome, Syncer, SyncerBuilder};

// 기록기
pub use writer::{KernelMessage, KernelMessagePriority, KmsgWriter, open_writer};
