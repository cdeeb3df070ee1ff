//! 커널 메시지 기록기
//!
//! 진단 도구와 테스트가 커널 링 버퍼에 메시지를 주입할 때 사용합니다.
//! `/dev/kmsg` 쓰기는 Linux와 root 권한이 필요하므로, 조건이 맞지 않으면
//! [`open_writer`]가 아무 일도 하지 않는 [`NoopWriter`]를 돌려줍니다.

pub mod message;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::KmsgError;

pub use message::{
    KernelMessage, KernelMessagePriority, MAX_PRINTK_RECORD_LENGTH, format_record,
};

/// 커널 메시지 기록기
pub trait KmsgWriter: Send + Sync {
    /// 메시지 하나를 기록합니다.
    fn write(&self, msg: &KernelMessage) -> Result<(), KmsgError>;

    /// 실제로는 아무것도 기록하지 않는 구현인지 여부
    fn is_noop(&self) -> bool {
        false
    }
}

/// 디바이스 파일에 직접 기록하는 구현
///
/// 쓰기마다 디바이스를 append 모드로 열고 닫습니다.
#[derive(Debug, Clone)]
pub struct DevKmsgWriter {
    path: PathBuf,
}

impl DevKmsgWriter {
    /// 주어진 경로에 기록하는 기록기를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 기록 대상 경로
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KmsgWriter for DevKmsgWriter {
    fn write(&self, msg: &KernelMessage) -> Result<(), KmsgError> {
        msg.validate()?;

        let Some(record) = format_record(msg.priority.level(), &msg.message) else {
            return Ok(());
        };

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(record.as_bytes())?;
        debug!(
            path = %self.path.display(),
            priority = %msg.priority,
            bytes = record.len(),
            "wrote kernel message"
        );
        Ok(())
    }
}

/// 아무것도 기록하지 않는 구현
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWriter;

impl KmsgWriter for NoopWriter {
    fn write(&self, _msg: &KernelMessage) -> Result<(), KmsgError> {
        Ok(())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// 현재 환경에 맞는 기록기를 생성합니다.
///
/// 빈 경로는 기본 디바이스로 대체됩니다. Linux가 아니거나, root가 아니거나,
/// 디바이스를 쓰기 모드로 열 수 없으면 [`NoopWriter`]를 반환합니다.
pub fn open_writer(path: impl AsRef<Path>) -> Box<dyn KmsgWriter> {
    let path = path.as_ref();
    let path = if path.as_os_str().is_empty() {
        Path::new(crate::DEFAULT_DEV_KMSG)
    } else {
        path
    };

    if !cfg!(target_os = "linux") {
        debug!("kmsg writer is only supported on linux");
        return Box::new(NoopWriter);
    }
    if !running_as_root() {
        debug!("kmsg writer requires root");
        return Box::new(NoopWriter);
    }
    if let Err(e) = OpenOptions::new().append(true).open(path) {
        warn!(path = %path.display(), error = %e, "failed to open kmsg device for writing");
        return Box::new(NoopWriter);
    }

    Box::new(DevKmsgWriter::new(path))
}

#[cfg(unix)]
fn running_as_root() -> bool {
    crate::device::is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}
