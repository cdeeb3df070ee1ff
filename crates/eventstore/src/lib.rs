#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`store`]: SQLite 파일과 RW/RO 커넥션 풀
//! - [`bucket`]: 버킷 trait과 테이블 기반 구현, 보존 기간 정리 루프
//! - [`codec`]: extra_info / suggested_actions 컬럼 인코딩
//! - [`error`]: 도메인 에러 타입

pub mod bucket;
pub mod codec;
pub mod error;
pub mod store;

// --- 주요 타입 re-export ---

// 저장소
pub use store::{Store, StoreConfig};

// 버킷
pub use bucket::{Bucket, SqliteBucket, table_name};

// 에러
pub use error::EventStoreError;
