//! 호스트 부팅 시각 조회
//!
//! 커널 레코드의 타임스탬프는 부팅 이후 경과 시간이므로, 벽시계 시각으로 바꾸려면
//! 부팅 시각이 필요합니다. Linux에서는 `/proc/stat`의 `btime` 줄을 사용합니다.

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::KmsgError;

/// 부팅 시각 제공자
pub trait BootTimeSource: Send + Sync {
    /// 호스트 부팅 시각을 반환합니다.
    fn boot_time(&self) -> Result<DateTime<Utc>, KmsgError>;
}

/// `/proc/stat` 기반 부팅 시각 제공자
#[derive(Debug, Clone)]
pub struct ProcStatBootTime {
    path: PathBuf,
}

impl ProcStatBootTime {
    /// 기본 경로(`/proc/stat`)를 사용합니다.
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/proc/stat"),
        }
    }

    /// 다른 경로의 stat 파일을 사용합니다.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcStatBootTime {
    fn default() -> Self {
        Self::new()
    }
}

impl BootTimeSource for ProcStatBootTime {
    fn boot_time(&self) -> Result<DateTime<Utc>, KmsgError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            KmsgError::BootTime(format!("failed to read {}: {e}", self.path.display()))
        })?;
        parse_btime(&contents)
    }
}

/// 고정된 부팅 시각 (테스트 및 재현용)
#[derive(Debug, Clone, Copy)]
pub struct FixedBootTime(pub DateTime<Utc>);

impl BootTimeSource for FixedBootTime {
    fn boot_time(&self) -> Result<DateTime<Utc>, KmsgError> {
        Ok(self.0)
    }
}

/// `/proc/stat` 내용에서 `btime` 값을 찾습니다.
pub fn parse_btime(contents: &str) -> Result<DateTime<Utc>, KmsgError> {
    let value = contents
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .ok_or_else(|| KmsgError::BootTime("btime not found in stat".to_owned()))?;

    let secs: i64 = value
        .trim()
        .parse()
        .map_err(|_| KmsgError::BootTime(format!("invalid btime value {value:?}")))?;

    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| KmsgError::BootTime(format!("btime out of range: {secs}")))
}
