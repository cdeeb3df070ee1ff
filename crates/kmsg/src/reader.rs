//! 드레인 리더 — 현재 버퍼에 쌓인 레코드를 한 번에 읽습니다.
//!
//! 시작 시 점검이나 주입한 메시지의 확인처럼 일회성 용도로 사용합니다.
//! 파싱 실패는 배치 전체를 실패시킵니다. 관대한 처리가 필요하면 호출자가
//! 배치를 다시 시작해야 합니다.

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use gpuhealth_core::metrics as m;
use metrics::counter;
use tracing::debug;

use crate::boot_time::BootTimeSource;
use crate::error::KmsgError;
use crate::parser::{Message, parse_line};
use crate::source::{RawRecordReader, READ_BUFFER_SIZE, decode_record};

/// 리더가 빌 때까지 레코드를 읽어 파싱합니다.
///
/// - `BrokenPipe` (링 버퍼 오버런): 기록 후 계속
/// - `WouldBlock`: 버퍼가 비었으므로 누적된 배치를 반환
/// - 0바이트 read: 더 읽을 것이 없으므로 배치를 반환
/// - 그 외 I/O 에러, 파싱 실패: 에러 반환
pub fn drain<R: RawRecordReader>(
    reader: &mut R,
    boot_time: DateTime<Utc>,
) -> Result<Vec<Message>, KmsgError> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut msgs = Vec::new();

    loop {
        let n = match reader.read_record(&mut buf) {
            Ok(0) => return Ok(msgs),
            Ok(n) => n,
            Err(e) => match e.kind() {
                ErrorKind::BrokenPipe => {
                    debug!("kmsg ring buffer overrun, continuing drain");
                    counter!(m::KMSG_OVERFLOW_TOTAL).increment(1);
                    continue;
                }
                ErrorKind::WouldBlock => return Ok(msgs),
                ErrorKind::Interrupted => continue,
                _ => return Err(KmsgError::Io(e)),
            },
        };

        let line = decode_record(&buf[..n]);
        if line.is_empty() {
            continue;
        }

        let msg = parse_line(boot_time, &line)
            .map_err(|source| KmsgError::Malformed { line, source })?;
        counter!(m::KMSG_MESSAGES_READ_TOTAL).increment(1);
        msgs.push(msg);
    }
}

/// 디바이스를 열어 현재 버퍼의 모든 레코드를 읽습니다.
#[cfg(unix)]
pub fn read_all(
    path: impl AsRef<Path>,
    boot_time: &dyn BootTimeSource,
) -> Result<Vec<Message>, KmsgError> {
    let mut device = crate::device::KmsgDevice::open(path)?;
    let boot = boot_time.boot_time()?;
    drain(&mut device, boot)
}

/// 디바이스를 열어 현재 버퍼의 모든 레코드를 읽습니다.
#[cfg(not(unix))]
pub fn read_all(
    _path: impl AsRef<Path>,
    _boot_time: &dyn BootTimeSource,
) -> Result<Vec<Message>, KmsgError> {
    Err(KmsgError::Io(std::io::Error::from(ErrorKind::Unsupported)))
}
