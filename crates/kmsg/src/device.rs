//! `/dev/kmsg` 디바이스 접근 (unix 전용)
//!
//! 디바이스는 read 한 번에 레코드 하나를 돌려줍니다. 드레인용 [`KmsgDevice`]는
//! fd를 논블로킹으로 전환해 버퍼가 비면 `WouldBlock`을 받고, 감시용
//! [`FollowDevice`]는 같은 fd를 tokio `AsyncFd`에 등록해 새 레코드를 기다립니다.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;

use tokio::io::unix::AsyncFd;

use crate::source::{RawRecordReader, READ_BUFFER_SIZE, RecordSource, decode_record};

/// 논블로킹 모드로 열린 kmsg 디바이스
#[derive(Debug)]
pub struct KmsgDevice {
    file: File,
}

impl KmsgDevice {
    /// 디바이스를 열고 fd를 논블로킹 모드로 전환합니다.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        set_nonblocking(&file)?;
        Ok(Self { file })
    }

    /// 감시용 비동기 디바이스로 전환합니다.
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn into_follow(self) -> io::Result<FollowDevice> {
        Ok(FollowDevice {
            inner: AsyncFd::new(self.file)?,
            buf: vec![0u8; READ_BUFFER_SIZE],
        })
    }
}

impl RawRecordReader for KmsgDevice {
    fn read_record(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// 감시용 비동기 kmsg 디바이스
#[derive(Debug)]
pub struct FollowDevice {
    inner: AsyncFd<File>,
    buf: Vec<u8>,
}

impl FollowDevice {
    /// 디바이스를 열어 감시용으로 등록합니다.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        KmsgDevice::open(path)?.into_follow()
    }
}

impl RecordSource for FollowDevice {
    async fn next_record(&mut self) -> io::Result<Option<String>> {
        let buf = &mut self.buf;
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(&mut buf[..])) {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => return Ok(Some(decode_record(&buf[..n]))),
                Ok(Err(e)) => return Err(e),
                // 준비 상태가 해제되었으므로 다시 대기
                Err(_would_block) => continue,
            }
        }
    }
}

fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_fd().as_raw_fd();
    // SAFETY: fd는 `file`이 살아 있는 동안 유효하며 fcntl은 메모리를 건드리지 않습니다.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: 위와 동일
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// 현재 프로세스가 root로 실행 중인지 확인합니다.
pub fn is_root() -> bool {
    // SAFETY: geteuid는 항상 성공하며 부작용이 없습니다.
    unsafe { libc::geteuid() == 0 }
}
