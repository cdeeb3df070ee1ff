//! 주입용 커널 메시지 타입과 레코드 포맷

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KmsgError;

/// printk 레코드 최대 길이 (1024 - 48바이트 헤더 예약분)
pub const MAX_PRINTK_RECORD_LENGTH: usize = 1024 - 48;

/// `LOG_SYSLOG` facility 값 (5 << 3)
const SYSLOG_FACILITY: u8 = 40;

const TRUNCATION_SUFFIX: &str = "...\n";

/// 커널 로그 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum KernelMessagePriority {
    /// KERN_EMERG (0)
    Emerg,
    /// KERN_ALERT (1)
    Alert,
    /// KERN_CRIT (2)
    Crit,
    /// KERN_ERR (3)
    Error,
    /// KERN_WARNING (4)
    Warning,
    /// KERN_NOTICE (5)
    Notice,
    /// KERN_INFO (6)
    #[default]
    Info,
    /// KERN_DEBUG (7)
    Debug,
    /// KERN_DEFAULT (레벨 4로 기록)
    Default,
}

impl KernelMessagePriority {
    /// `KERN_*` 표기 문자열을 반환합니다.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emerg => "KERN_EMERG",
            Self::Alert => "KERN_ALERT",
            Self::Crit => "KERN_CRIT",
            Self::Error => "KERN_ERR",
            Self::Warning => "KERN_WARNING",
            Self::Notice => "KERN_NOTICE",
            Self::Info => "KERN_INFO",
            Self::Debug => "KERN_DEBUG",
            Self::Default => "KERN_DEFAULT",
        }
    }

    /// 숫자 로그 레벨 (0..=7)
    pub fn level(self) -> u8 {
        match self {
            Self::Emerg => 0,
            Self::Alert => 1,
            Self::Crit => 2,
            Self::Error => 3,
            Self::Warning | Self::Default => 4,
            Self::Notice => 5,
            Self::Info => 6,
            Self::Debug => 7,
        }
    }

    /// `KERN_*` 또는 `kern.*` 표기를 변환합니다.
    ///
    /// 대소문자를 구분하며, 알 수 없는 값은 `KERN_INFO`가 됩니다.
    pub fn convert(s: &str) -> Self {
        match s {
            "KERN_EMERG" | "kern.emerg" => Self::Emerg,
            "KERN_ALERT" | "kern.alert" => Self::Alert,
            "KERN_CRIT" | "kern.crit" => Self::Crit,
            "KERN_ERR" | "kern.err" => Self::Error,
            "KERN_WARNING" | "kern.warning" | "kern.warn" => Self::Warning,
            "KERN_NOTICE" | "kern.notice" => Self::Notice,
            "KERN_INFO" | "kern.info" => Self::Info,
            "KERN_DEBUG" | "kern.debug" => Self::Debug,
            "KERN_DEFAULT" | "kern.default" => Self::Default,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for KernelMessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for KernelMessagePriority {
    fn from(s: String) -> Self {
        Self::convert(&s)
    }
}

impl From<KernelMessagePriority> for String {
    fn from(p: KernelMessagePriority) -> Self {
        p.as_str().to_owned()
    }
}

/// 커널 링 버퍼에 기록할 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelMessage {
    /// 로그 레벨
    pub priority: KernelMessagePriority,
    /// 본문
    pub message: String,
}

impl KernelMessage {
    /// 새 메시지를 생성합니다.
    pub fn new(priority: KernelMessagePriority, message: impl Into<String>) -> Self {
        Self {
            priority,
            message: message.into(),
        }
    }

    /// 본문 길이를 검증합니다.
    pub fn validate(&self) -> Result<(), KmsgError> {
        if self.message.len() > MAX_PRINTK_RECORD_LENGTH {
            return Err(KmsgError::MessageTooLong {
                len: self.message.len(),
                max: MAX_PRINTK_RECORD_LENGTH,
            });
        }
        Ok(())
    }
}

/// 본문을 `/dev/kmsg`에 쓸 레코드로 변환합니다.
///
/// 줄마다 `<{40 + level}>` 접두어를 붙이고 탭은 공백으로 바꿉니다.
/// 빈 본문이면 `None`을 반환합니다. 결과가 [`MAX_PRINTK_RECORD_LENGTH`]를
/// 넘으면 잘라내고 `...\n`으로 끝냅니다.
pub fn format_record(level: u8, text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(text.len() + 8);
    for line in text.split_inclusive('\n') {
        let line = line.strip_suffix('\n').unwrap_or(line);
        push_line(&mut out, level, line);
    }

    if out.len() > MAX_PRINTK_RECORD_LENGTH {
        let mut cut = MAX_PRINTK_RECORD_LENGTH - TRUNCATION_SUFFIX.len();
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str(TRUNCATION_SUFFIX);
    }
    Some(out)
}

fn push_line(out: &mut String, level: u8, line: &str) {
    out.push('<');
    out.push_str(&(u16::from(SYSLOG_FACILITY) + u16::from(level)).to_string());
    out.push('>');
    out.extend(line.chars().map(|c| if c == '\t' { ' ' } else { c }));
    out.push('\n');
}
