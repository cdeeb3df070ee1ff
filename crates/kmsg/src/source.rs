//! 레코드 소스 추상화
//!
//! 드레인 리더와 감시자는 디바이스 대신 이 trait들 위에서 동작하므로
//! 플랫폼과 무관하게 가짜 구현으로 테스트할 수 있습니다.
//!
//! - [`RawRecordReader`]: 논블로킹 read 한 번에 레코드 하나 (드레인용)
//! - [`RecordSource`]: 비동기 스트림에서 레코드 하나씩 (감시용)

use std::future::Future;
use std::io;

use tokio::sync::mpsc;

/// 레코드 읽기 버퍼 크기
pub const READ_BUFFER_SIZE: usize = 8192;

/// 동기 raw 레코드 리더
///
/// 한 번의 `read_record` 호출은 최대 하나의 완전한 레코드를 반환합니다.
/// 버퍼가 비었으면 `ErrorKind::WouldBlock`, 링 버퍼를 놓쳤으면
/// `ErrorKind::BrokenPipe`를 반환해야 합니다.
pub trait RawRecordReader {
    /// 레코드 하나를 `buf`에 읽고 바이트 수를 반환합니다.
    fn read_record(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// 비동기 레코드 소스
///
/// `Ok(None)`은 스트림 종료(EOF)를 뜻합니다.
/// 링 버퍼 오버런은 `ErrorKind::BrokenPipe` 에러로 전달되며, 호출자는
/// 이후에도 계속 읽을 수 있습니다.
pub trait RecordSource: Send + 'static {
    /// 다음 레코드를 기다립니다.
    fn next_record(&mut self) -> impl Future<Output = io::Result<Option<String>>> + Send;
}

/// raw 바이트를 레코드 문자열로 변환합니다.
///
/// 레코드 끝의 개행 하나는 프레이밍이므로 제거합니다.
pub fn decode_record(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// 아무것도 읽지 않는 소스
///
/// 디바이스를 열 수 없는 환경(비 Linux, 비 root)에서 감시자 자리를 채웁니다.
/// 감시자가 닫힐 때까지 영원히 대기합니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSource;

impl RecordSource for NoopSource {
    async fn next_record(&mut self) -> io::Result<Option<String>> {
        std::future::pending().await
    }
}

/// 채널 기반 인메모리 소스
///
/// 송신측이 모두 닫히면 EOF가 됩니다. 재생 도구와 테스트에서 사용합니다.
pub struct ChannelSource {
    rx: mpsc::Receiver<io::Result<String>>,
}

impl ChannelSource {
    /// 주어진 용량의 채널과 소스를 생성합니다.
    pub fn new(capacity: usize) -> (mpsc::Sender<io::Result<String>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

impl RecordSource for ChannelSource {
    async fn next_record(&mut self) -> io::Result<Option<String>> {
        match self.rx.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
