//! 컬럼 JSON 인코딩
//!
//! `extra_info`는 순서 없는 맵이지만 `find`가 SQL 문자열 비교로 일치 여부를
//! 판단하므로, 키 순으로 정렬된 `[{"k":..,"v":..}]` 배열로 직렬화해 같은 내용이
//! 항상 같은 바이트열이 되도록 합니다.
//!
//! 읽을 때는 깨진 JSON을 에러로 올리지 않고 필드를 비워 둡니다. 행 하나가
//! 손상되어도 나머지 조회는 계속됩니다.

use std::collections::BTreeMap;

use gpuhealth_core::types::SuggestedActions;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Serialize)]
struct Pair<'a> {
    k: &'a str,
    v: &'a str,
}

#[derive(Deserialize)]
struct OwnedPair {
    k: String,
    v: String,
}

/// `extra_info`를 정렬된 키/값 배열 JSON으로 인코딩합니다.
///
/// 빈 맵은 빈 문자열이 되어 `NULLIF`로 NULL 저장됩니다.
pub fn encode_extra_info(map: &BTreeMap<String, String>) -> Result<String, serde_json::Error> {
    if map.is_empty() {
        return Ok(String::new());
    }
    let pairs: Vec<Pair<'_>> = map.iter().map(|(k, v)| Pair { k, v }).collect();
    serde_json::to_string(&pairs)
}

/// 저장된 `extra_info`를 복원합니다.
///
/// 정렬 배열 형식과 일반 JSON 객체 형식을 모두 받습니다. NULL, 빈 문자열,
/// `null`, 깨진 JSON은 빈 맵이 됩니다.
pub fn decode_extra_info(raw: Option<&str>) -> BTreeMap<String, String> {
    let Some(raw) = valid_json_text(raw) else {
        return BTreeMap::new();
    };

    if let Ok(pairs) = serde_json::from_str::<Vec<OwnedPair>>(raw) {
        return pairs.into_iter().map(|p| (p.k, p.v)).collect();
    }
    match serde_json::from_str::<BTreeMap<String, String>>(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "ignoring malformed extra_info column");
            BTreeMap::new()
        }
    }
}

/// `suggested_actions`를 JSON 객체로 인코딩합니다. `None`은 빈 문자열입니다.
pub fn encode_suggested_actions(
    actions: Option<&SuggestedActions>,
) -> Result<String, serde_json::Error> {
    match actions {
        Some(a) => serde_json::to_string(a),
        None => Ok(String::new()),
    }
}

/// 저장된 `suggested_actions`를 복원합니다. 유효하지 않으면 `None`입니다.
pub fn decode_suggested_actions(raw: Option<&str>) -> Option<SuggestedActions> {
    unmarshal_if_valid(raw)
}

/// NULL, 빈 문자열, `null`이 아닌 JSON 객체 텍스트만 역직렬화합니다.
pub fn unmarshal_if_valid<T: for<'de> Deserialize<'de>>(raw: Option<&str>) -> Option<T> {
    let raw = valid_json_text(raw)?;
    if !raw.starts_with('{') {
        warn!("ignoring non-object json column");
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "ignoring malformed json column");
            None
        }
    }
}

fn valid_json_text(raw: Option<&str>) -> Option<&str> {
    let raw = raw?.trim();
    if raw.is_empty() || raw == "null" {
        None
    } else {
        Some(raw)
    }
}
