//! 도메인 타입 — 이벤트 저장소와 싱커가 공유하는 타입
//!
//! [`Event`]는 커널 로그에서 추출되어 이벤트 저장소에 영속화되는 단위입니다.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 영속화되는 이벤트
///
/// 저장 시 `time`은 초 단위로 절삭됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 이벤트 발생 시각
    pub time: DateTime<Utc>,
    /// 기계 판독용 짧은 분류명
    pub name: String,
    /// 심각도 분류
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// 사람이 읽는 메시지 (비어 있을 수 있음)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// 부가 정보 (순서 없는 key-value)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_info: BTreeMap<String, String>,
    /// 조치 제안 (다른 생산자가 채우며 그대로 왕복되어야 함)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<SuggestedActions>,
}

impl Event {
    /// 필수 필드만 채운 새 이벤트를 생성합니다.
    pub fn new(time: DateTime<Utc>, name: impl Into<String>, event_type: EventType) -> Self {
        Self {
            time,
            name: name.into(),
            event_type,
            message: String::new(),
            extra_info: BTreeMap::new(),
            suggested_actions: None,
        }
    }

    /// 메시지를 설정합니다.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// 부가 정보 항목을 추가합니다.
    pub fn with_extra_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_info.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.event_type,
            self.time.to_rfc3339(),
            self.name,
            self.message,
        )
    }
}

/// 이벤트 심각도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventType {
    /// 알 수 없음
    #[default]
    Unknown,
    /// 정보성
    Info,
    /// 경고
    Warning,
    /// 치명적 — 조치 필요
    Critical,
    /// 복구 불가
    Fatal,
}

impl EventType {
    /// 저장 형식 문자열을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
            Self::Fatal => "Fatal",
        }
    }

    /// 저장 형식 문자열에서 파싱합니다.
    ///
    /// 알 수 없는 값은 [`EventType::Unknown`]이 됩니다.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "Info" => Self::Info,
            "Warning" => Self::Warning,
            "Critical" => Self::Critical,
            "Fatal" => Self::Fatal,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 문제 완화를 위한 조치 제안
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedActions {
    /// 문제 설명
    pub description: String,
    /// 조치 목록
    pub repair_actions: Vec<RepairActionType>,
}

impl SuggestedActions {
    /// 조치 목록을 쉼표로 연결한 문자열을 반환합니다.
    pub fn describe_actions(&self) -> String {
        self.repair_actions
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 조치 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairActionType {
    /// 조치 불필요
    IgnoreNoActionRequired,
    /// 시스템 재부팅
    RebootSystem,
    /// 하드웨어 점검
    HardwareInspection,
    /// 사용자 애플리케이션 및 GPU 확인
    #[serde(rename = "CHECK_USER_APP_AND_GPU")]
    CheckUserAppAndGpu,
}

impl fmt::Display for RepairActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IgnoreNoActionRequired => "IGNORE_NO_ACTION_REQUIRED",
            Self::RebootSystem => "REBOOT_SYSTEM",
            Self::HardwareInspection => "HARDWARE_INSPECTION",
            Self::CheckUserAppAndGpu => "CHECK_USER_APP_AND_GPU",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_default_is_unknown() {
        assert_eq!(EventType::default(), EventType::Unknown);
    }

    #[test]
    fn event_type_from_str_lossy() {
        assert_eq!(EventType::from_str_lossy("Warning"), EventType::Warning);
        assert_eq!(EventType::from_str_lossy("Fatal"), EventType::Fatal);
        assert_eq!(EventType::from_str_lossy("warning"), EventType::Unknown);
        assert_eq!(EventType::from_str_lossy(""), EventType::Unknown);
    }

    #[test]
    fn event_type_display_matches_as_str() {
        for t in [
            EventType::Unknown,
            EventType::Info,
            EventType::Warning,
            EventType::Critical,
            EventType::Fatal,
        ] {
            assert_eq!(t.to_string(), t.as_str());
            assert_eq!(EventType::from_str_lossy(t.as_str()), t);
        }
    }

    #[test]
    fn repair_action_serde_names() {
        let json = serde_json::to_string(&RepairActionType::CheckUserAppAndGpu).unwrap();
        assert_eq!(json, "\"CHECK_USER_APP_AND_GPU\"");
        let parsed: RepairActionType = serde_json::from_str("\"REBOOT_SYSTEM\"").unwrap();
        assert_eq!(parsed, RepairActionType::RebootSystem);
    }

    #[test]
    fn suggested_actions_json_shape() {
        let sa = SuggestedActions {
            description: "row remapping failed".to_owned(),
            repair_actions: vec![RepairActionType::HardwareInspection],
        };
        let json = serde_json::to_string(&sa).unwrap();
        assert_eq!(
            json,
            r#"{"description":"row remapping failed","repair_actions":["HARDWARE_INSPECTION"]}"#
        );
        assert_eq!(sa.describe_actions(), "HARDWARE_INSPECTION");
    }

    #[test]
    fn event_builder_sets_fields() {
        let ev = Event::new(Utc::now(), "nvidia_xid", EventType::Critical)
            .with_message("Xid 79")
            .with_extra_info("log_line", "NVRM: Xid 79");
        assert_eq!(ev.message, "Xid 79");
        assert_eq!(ev.extra_info.get("log_line").map(String::as_str), Some("NVRM: Xid 79"));
        assert!(ev.suggested_actions.is_none());
    }
}
