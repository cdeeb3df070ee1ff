//! 설정 관리 — gpuhealth.toml 파싱 및 런타임 설정
//!
//! [`GpuhealthConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`GPUHEALTH_KMSG_DEVICE_PATH=/dev/kmsg` 형식)
//! 3. 설정 파일 (`gpuhealth.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), gpuhealth_core::error::GpuhealthError> {
//! use gpuhealth_core::config::GpuhealthConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = GpuhealthConfig::load("gpuhealth.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = GpuhealthConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, GpuhealthError};

/// gpuhealth 통합 설정
///
/// `gpuhealth.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuhealthConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 커널 메시지 감시 설정
    #[serde(default)]
    pub kmsg: KmsgConfig,
    /// 이벤트 저장소 설정
    #[serde(default)]
    pub event_store: EventStoreConfig,
}

impl GpuhealthConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GpuhealthError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, GpuhealthError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GpuhealthError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                GpuhealthError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, GpuhealthError> {
        toml::from_str(toml_str).map_err(|e| {
            GpuhealthError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `GPUHEALTH_{SECTION}_{FIELD}`
    /// 예: `GPUHEALTH_EVENT_STORE_RETENTION_SECS=3600`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "GPUHEALTH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "GPUHEALTH_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "GPUHEALTH_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "GPUHEALTH_GENERAL_PID_FILE");

        // kmsg
        override_bool(&mut self.kmsg.enabled, "GPUHEALTH_KMSG_ENABLED");
        override_string(&mut self.kmsg.device_path, "GPUHEALTH_KMSG_DEVICE_PATH");
        override_u64(
            &mut self.kmsg.dedup_window_secs,
            "GPUHEALTH_KMSG_DEDUP_WINDOW_SECS",
        );
        override_u64(
            &mut self.kmsg.dedup_expiration_secs,
            "GPUHEALTH_KMSG_DEDUP_EXPIRATION_SECS",
        );
        override_u64(
            &mut self.kmsg.dedup_purge_interval_secs,
            "GPUHEALTH_KMSG_DEDUP_PURGE_INTERVAL_SECS",
        );
        override_usize(
            &mut self.kmsg.channel_capacity,
            "GPUHEALTH_KMSG_CHANNEL_CAPACITY",
        );
        override_u64(&mut self.kmsg.send_timeout_ms, "GPUHEALTH_KMSG_SEND_TIMEOUT_MS");
        override_string(&mut self.kmsg.bucket, "GPUHEALTH_KMSG_BUCKET");

        // Event Store
        override_string(
            &mut self.event_store.db_file,
            "GPUHEALTH_EVENT_STORE_DB_FILE",
        );
        override_u64(
            &mut self.event_store.retention_secs,
            "GPUHEALTH_EVENT_STORE_RETENTION_SECS",
        );
        override_u32(
            &mut self.event_store.max_read_connections,
            "GPUHEALTH_EVENT_STORE_MAX_READ_CONNECTIONS",
        );
        override_u64(
            &mut self.event_store.query_timeout_ms,
            "GPUHEALTH_EVENT_STORE_QUERY_TIMEOUT_MS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), GpuhealthError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.kmsg.enabled {
            if self.kmsg.device_path.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "kmsg.device_path".to_owned(),
                    reason: "device path must not be empty when kmsg is enabled".to_owned(),
                }
                .into());
            }

            if self.kmsg.bucket.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "kmsg.bucket".to_owned(),
                    reason: "bucket name must not be empty".to_owned(),
                }
                .into());
            }
        }

        let positive = [
            ("kmsg.dedup_window_secs", self.kmsg.dedup_window_secs),
            ("kmsg.dedup_expiration_secs", self.kmsg.dedup_expiration_secs),
            (
                "kmsg.dedup_purge_interval_secs",
                self.kmsg.dedup_purge_interval_secs,
            ),
            ("kmsg.send_timeout_ms", self.kmsg.send_timeout_ms),
            ("event_store.query_timeout_ms", self.event_store.query_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_owned(),
                    reason: "must be greater than 0".to_owned(),
                }
                .into());
            }
        }

        if self.kmsg.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "kmsg.channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.event_store.max_read_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_store.max_read_connections".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        for (i, rule) in self.kmsg.rules.iter().enumerate() {
            if rule.name.trim().is_empty() || rule.pattern.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("kmsg.rules[{i}]"),
                    reason: "rule name and pattern must not be empty".to_owned(),
                }
                .into());
            }
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                return Err(ConfigError::InvalidValue {
                    field: format!("kmsg.rules[{i}].pattern"),
                    reason: format!("invalid regex: {e}"),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/gpuhealth".to_owned(),
            pid_file: "/var/run/gpuhealthd.pid".to_owned(),
        }
    }
}

/// 커널 메시지 감시 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsgConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 커널 링 버퍼 디바이스 경로
    pub device_path: String,
    /// 중복 제거 시간 창 (초)
    pub dedup_window_secs: u64,
    /// 중복 제거 캐시 항목 만료 (초)
    pub dedup_expiration_secs: u64,
    /// 만료 항목 일괄 정리 주기 (초)
    pub dedup_purge_interval_secs: u64,
    /// 감시자 → 싱커 채널 용량
    pub channel_capacity: usize,
    /// 채널 전송 대기 한도 (밀리초). 초과 시 메시지를 버립니다.
    pub send_timeout_ms: u64,
    /// 이벤트를 저장할 버킷 이름
    pub bucket: String,
    /// 매칭 규칙 (위에서부터 첫 매치 우선)
    pub rules: Vec<MatchRuleConfig>,
}

impl KmsgConfig {
    /// 중복 제거 시간 창
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// 중복 제거 캐시 항목 만료
    pub fn dedup_expiration(&self) -> Duration {
        Duration::from_secs(self.dedup_expiration_secs)
    }

    /// 만료 항목 정리 주기
    pub fn dedup_purge_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_purge_interval_secs)
    }

    /// 채널 전송 대기 한도
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for KmsgConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_path: "/dev/kmsg".to_owned(),
            dedup_window_secs: 60,
            dedup_expiration_secs: 15 * 60,
            dedup_purge_interval_secs: 5 * 60,
            channel_capacity: 1000,
            send_timeout_ms: 1000,
            bucket: "kmsg".to_owned(),
            rules: default_rules(),
        }
    }
}

/// 정규식 매칭 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRuleConfig {
    /// 매칭 시 생성할 이벤트 이름
    pub name: String,
    /// 정규식 패턴
    pub pattern: String,
}

fn default_rules() -> Vec<MatchRuleConfig> {
    [
        ("nvidia_xid", r"NVRM: Xid \(.*?\): \d+,"),
        ("nvidia_sxid", r"nvidia-nvswitch\d?: SXid \(.*?\): \d+,"),
        ("kernel_oops", r"Oops: "),
        ("hung_task", r"task .+ blocked for more than \d+ seconds"),
    ]
    .into_iter()
    .map(|(name, pattern)| MatchRuleConfig {
        name: name.to_owned(),
        pattern: pattern.to_owned(),
    })
    .collect()
}

/// 이벤트 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// SQLite 파일 경로 (비어 있으면 `{data_dir}/gpuhealth.state`)
    pub db_file: String,
    /// 이벤트 보존 기간 (초). 1초 미만이면 자동 정리를 하지 않습니다.
    pub retention_secs: u64,
    /// 읽기 전용 커넥션 최대 개수
    pub max_read_connections: u32,
    /// 싱커의 조회/삽입 단건 타임아웃 (밀리초)
    pub query_timeout_ms: u64,
}

impl EventStoreConfig {
    /// 실제 DB 파일 경로를 계산합니다.
    pub fn resolve_db_file(&self, data_dir: &str) -> PathBuf {
        if self.db_file.is_empty() {
            Path::new(data_dir).join("gpuhealth.state")
        } else {
            PathBuf::from(&self.db_file)
        }
    }

    /// 보존 기간
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// 단건 질의 타임아웃
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            db_file: String::new(),
            retention_secs: 3 * 24 * 60 * 60, // 3일
            max_read_connections: 4,
            query_timeout_ms: 5000,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
