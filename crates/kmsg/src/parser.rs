//! `/dev/kmsg` 레코드 파서
//!
//! 커널 링 버퍼의 레코드 한 개를 [`Message`]로 변환합니다.
//!
//! # 레코드 형식
//! ```text
//! PRIORITY,SEQUENCE,TIMESTAMP_US,FLAGS[,MORE...];MESSAGE
//! 6,2565,102258085667,-;docker0: port 2 entered blocking state
//! ```
//!
//! 타임스탬프는 부팅 이후 경과 마이크로초이므로 호출자가 넘긴 부팅 시각에 더해
//! 벽시계 시각으로 변환합니다. 값의 범위는 검증하지 않습니다.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

const ERR_MISSING_DELIMITER: &str = "invalid kmsg; must contain a ';'";
const ERR_TOO_FEW_FIELDS: &str =
    "invalid kmsg: must contain at least 3 ',' separated pieces at the start";

/// 파싱된 커널 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// 커널 로그 레벨 (범위 검증 없음)
    pub priority: i64,
    /// 부팅 단위 시퀀스 번호
    pub sequence_number: i64,
    /// 벽시계 시각 (부팅 시각 + 오프셋)
    pub timestamp: DateTime<Utc>,
    /// 첫 번째 `;` 이후의 본문
    pub message: String,
}

impl Message {
    /// `since` 기준 상대 시각 ("3 minutes ago", "1 hour from now")
    ///
    /// 1초 미만 차이는 "now"입니다. 한 달은 30일, 1년은 12개월로 셉니다.
    pub fn describe_timestamp(&self, since: DateTime<Utc>) -> String {
        const MINUTE: i64 = 60;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;
        const WEEK: i64 = 7 * DAY;
        const MONTH: i64 = 30 * DAY;
        const YEAR: i64 = 12 * MONTH;

        let delta = since.signed_duration_since(self.timestamp).num_seconds();
        let (secs, label) = if delta >= 0 {
            (delta, "ago")
        } else {
            (-delta, "from now")
        };

        let amount = match secs {
            0 => return "now".to_owned(),
            1 => "1 second".to_owned(),
            s if s < MINUTE => format!("{s} seconds"),
            s if s < 2 * MINUTE => "1 minute".to_owned(),
            s if s < HOUR => format!("{} minutes", s / MINUTE),
            s if s < 2 * HOUR => "1 hour".to_owned(),
            s if s < DAY => format!("{} hours", s / HOUR),
            s if s < 2 * DAY => "1 day".to_owned(),
            s if s < WEEK => format!("{} days", s / DAY),
            s if s < 2 * WEEK => "1 week".to_owned(),
            s if s < MONTH => format!("{} weeks", s / WEEK),
            s if s < 2 * MONTH => "1 month".to_owned(),
            s if s < YEAR => format!("{} months", s / MONTH),
            s if s < 2 * YEAR => "1 year".to_owned(),
            s => format!("{} years", s / YEAR),
        };
        format!("{amount} {label}")
    }
}

/// 레코드 한 줄을 파싱합니다.
///
/// 본문은 첫 번째 `;` 이후 전체이며, 본문 안의 `;`는 구분자로 취급하지 않습니다.
/// 세 번째 이후의 메타데이터 필드는 무시합니다.
pub fn parse_line(boot_time: DateTime<Utc>, line: &str) -> Result<Message, ParseError> {
    let (metadata, text) = line.split_once(';').ok_or(ParseError::InvalidFormat {
        reason: ERR_MISSING_DELIMITER,
    })?;

    let mut fields = metadata.split(',');
    let (Some(priority), Some(sequence), Some(offset)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(ParseError::InvalidFormat {
            reason: ERR_TOO_FEW_FIELDS,
        });
    };

    let priority = parse_field("priority", priority)?;
    let sequence_number = parse_field("sequence_number", sequence)?;
    let offset_us = parse_field("timestamp", offset)?;

    Ok(Message {
        priority,
        sequence_number,
        timestamp: add_micros(boot_time, offset_us),
        message: text.to_owned(),
    })
}

fn parse_field(field: &'static str, value: &str) -> Result<i64, ParseError> {
    value.parse::<i64>().map_err(|_| ParseError::MalformedField {
        field,
        value: value.to_owned(),
    })
}

/// 범위를 벗어나면 표현 가능한 최솟값/최댓값으로 포화시킵니다.
fn add_micros(base: DateTime<Utc>, micros: i64) -> DateTime<Utc> {
    match base.checked_add_signed(TimeDelta::microseconds(micros)) {
        Some(ts) => ts,
        None if micros >= 0 => DateTime::<Utc>::MAX_UTC,
        None => DateTime::<Utc>::MIN_UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn boot() -> DateTime<Utc> {
        Utc.timestamp_opt(1000, 0).unwrap()
    }

    #[test]
    fn parse_standard_record() {
        let msg = parse_line(
            boot(),
            "6,2565,102258085667,-;docker0: port 2(vethc1bb733) entered blocking state",
        )
        .unwrap();
        assert_eq!(msg.priority, 6);
        assert_eq!(msg.sequence_number, 2565);
        assert_eq!(
            msg.timestamp,
            boot() + TimeDelta::microseconds(102_258_085_667)
        );
        assert_eq!(
            msg.message,
            "docker0: port 2(vethc1bb733) entered blocking state"
        );
    }

    #[test]
    fn parse_keeps_semicolons_in_body() {
        let msg = parse_line(boot(), "3,123,5000,-;Message with; semicolons; in it").unwrap();
        assert_eq!(msg.message, "Message with; semicolons; in it");
    }

    #[test]
    fn parse_ignores_extra_metadata() {
        let msg = parse_line(boot(), "2,456,7890,extra,fields,-;Message with extra metadata")
            .unwrap();
        assert_eq!(msg.priority, 2);
        assert_eq!(msg.sequence_number, 456);
        assert_eq!(msg.timestamp, boot() + TimeDelta::microseconds(7890));
        assert_eq!(msg.message, "Message with extra metadata");
    }

    #[test]
    fn parse_exactly_three_fields() {
        let msg = parse_line(boot(), "4,100,0;Message at boot time").unwrap();
        assert_eq!(msg.timestamp, boot());
    }

    #[test]
    fn parse_empty_body() {
        let msg = parse_line(boot(), "1,100,5000,-;").unwrap();
        assert_eq!(msg.message, "");
    }

    #[test]
    fn parse_negative_priority_and_sequence() {
        let msg = parse_line(boot(), "-1,-100,5000,-;odd values").unwrap();
        assert_eq!(msg.priority, -1);
        assert_eq!(msg.sequence_number, -100);
    }

    #[test]
    fn describe_timestamp_relative_to_since() {
        let msg = parse_line(boot(), "6,1,0,-;x").unwrap();
        let at = |secs: i64| boot() + TimeDelta::seconds(secs);

        assert_eq!(msg.describe_timestamp(boot()), "now");
        assert_eq!(msg.describe_timestamp(at(1)), "1 second ago");
        assert_eq!(msg.describe_timestamp(at(45)), "45 seconds ago");
        assert_eq!(msg.describe_timestamp(at(90)), "1 minute ago");
        assert_eq!(msg.describe_timestamp(at(10 * 60)), "10 minutes ago");
        assert_eq!(msg.describe_timestamp(at(3 * 3600 + 59)), "3 hours ago");
        assert_eq!(msg.describe_timestamp(at(30 * 3600)), "1 day ago");
        assert_eq!(msg.describe_timestamp(at(3 * 7 * 86_400)), "3 weeks ago");
        assert_eq!(msg.describe_timestamp(at(400 * 86_400)), "1 year ago");
        assert_eq!(msg.describe_timestamp(at(-5 * 60)), "5 minutes from now");
    }

    #[test]
    fn describe_timestamp_of_saturated_timestamp() {
        let msg = parse_line(boot(), &format!("6,1,{},-;x", i64::MAX)).unwrap();
        assert!(msg.describe_timestamp(boot()).ends_with("years from now"));
    }

    #[test]
    fn parse_priority_beyond_i32_range() {
        // 상위 비트는 facility 값이며 파서는 그대로 보존합니다.
        let msg = parse_line(boot(), "4294967302,1,0,-;wide prio").unwrap();
        assert_eq!(msg.priority, 4_294_967_302);
        assert_eq!(msg.priority & 7, 6);
    }

    #[test]
    fn parse_negative_offset_goes_before_boot() {
        let msg = parse_line(boot(), "6,1,-1000000,-;before boot").unwrap();
        assert_eq!(msg.timestamp, boot() - TimeDelta::seconds(1));
    }

    #[test]
    fn parse_huge_offset_saturates() {
        let msg = parse_line(boot(), "1,100,9223372036854775807,-;far future").unwrap();
        assert_eq!(msg.timestamp, DateTime::<Utc>::MAX_UTC);

        let msg = parse_line(boot(), "1,100,-9223372036854775808,-;far past").unwrap();
        assert_eq!(msg.timestamp, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn parse_rejects_missing_semicolon() {
        let err = parse_line(boot(), "6,2565,102258085667,- no delimiter").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidFormat {
                reason: ERR_MISSING_DELIMITER
            }
        );
        assert_eq!(err.to_string(), "invalid kmsg; must contain a ';'");
    }

    #[test]
    fn parse_rejects_empty_line() {
        assert!(matches!(
            parse_line(boot(), ""),
            Err(ParseError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn parse_rejects_too_few_fields() {
        let err = parse_line(boot(), "6,2565;message").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidFormat {
                reason: ERR_TOO_FEW_FIELDS
            }
        );
    }

    #[test]
    fn parse_names_malformed_field() {
        let cases = [
            ("invalid,2565,102258085667,-;message", "priority"),
            ("6,invalid,102258085667,-;message", "sequence_number"),
            ("6,2565,invalid,-;message", "timestamp"),
        ];
        for (input, field) in cases {
            match parse_line(boot(), input) {
                Err(ParseError::MalformedField { field: f, .. }) => assert_eq!(f, field, "{input}"),
                other => panic!("unexpected result for {input}: {other:?}"),
            }
        }
    }

    #[test]
    fn parse_max_int32_sequence() {
        let msg = parse_line(boot(), "3,2147483647,50000,-;max seq").unwrap();
        assert_eq!(msg.sequence_number, 2_147_483_647);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_arbitrary_input_does_not_panic(line in ".{0,400}") {
                let _ = parse_line(boot(), &line);
            }

            #[test]
            fn parse_roundtrip(
                priority in any::<i64>(),
                seq in any::<i64>(),
                offset in -1_000_000_000_000i64..1_000_000_000_000_000,
                text in "[^\n]{0,200}",
            ) {
                let raw = format!("{priority},{seq},{offset},-;{text}");
                let msg = parse_line(boot(), &raw).unwrap();
                prop_assert_eq!(msg.priority, priority);
                prop_assert_eq!(msg.sequence_number, seq);
                prop_assert_eq!(msg.timestamp, boot() + TimeDelta::microseconds(offset));
                prop_assert_eq!(msg.message, text);
            }

            #[test]
            fn parse_without_semicolon_fails(line in "[^;]{0,200}") {
                prop_assert!(
                    matches!(parse_line(boot(), &line), Err(ParseError::InvalidFormat { .. })),
                    "missing ';' should be rejected"
                );
            }

            #[test]
            fn parse_extra_fields_are_ignored(extra in prop::collection::vec("[a-z0-9=-]{0,8}", 0..5)) {
                let mut metadata = String::from("6,42,1000");
                for f in &extra {
                    metadata.push(',');
                    metadata.push_str(f);
                }
                let msg = parse_line(boot(), &format!("{metadata};body")).unwrap();
                prop_assert_eq!(msg.sequence_number, 42);
                prop_assert_eq!(msg.message, "body");
            }
        }
    }
}
