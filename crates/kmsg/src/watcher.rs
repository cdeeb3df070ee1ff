//! 팔로우 감시자 — 새로 도착하는 커널 레코드를 채널로 흘려보냅니다.
//!
//! # 생명주기
//! `NotStarted → Watching → Closed`. 인스턴스당 [`Watcher::watch`]는 한 번만
//! 실행되며, 두 번째 호출은 [`KmsgError::AlreadyStarted`]를 즉시 반환하고
//! 첫 세션에는 영향을 주지 않습니다.
//!
//! # 전송 정책
//! 각 레코드는 [`Deduper`]를 거쳐 현재 창에서 처음 본 메시지만 전달됩니다.
//! 소비자가 `send_timeout` 안에 받지 않으면 메시지를 버리고 다음 레코드를 읽습니다.
//! 느린 소비자가 링 버퍼 리더를 막지 않도록 배압을 여기서 끊습니다.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gpuhealth_core::config::KmsgConfig;
use gpuhealth_core::metrics as m;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::boot_time::BootTimeSource;
use crate::deduper::Deduper;
use crate::error::KmsgError;
use crate::parser::{Message, parse_line};
use crate::source::{NoopSource, RecordSource};

/// 감시자 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// 중복 제거 시간 창
    pub dedup_window: Duration,
    /// 중복 제거 캐시 항목 만료
    pub dedup_expiration: Duration,
    /// 만료 항목 일괄 정리 주기
    pub dedup_purge_interval: Duration,
    /// 채널 전송 대기 한도
    pub send_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(60),
            dedup_expiration: Duration::from_secs(15 * 60),
            dedup_purge_interval: Duration::from_secs(5 * 60),
            send_timeout: Duration::from_secs(1),
        }
    }
}

impl WatcherConfig {
    /// core의 `KmsgConfig`에서 감시자 설정을 생성합니다.
    pub fn from_core(core: &KmsgConfig) -> Self {
        Self {
            dedup_window: core.dedup_window(),
            dedup_expiration: core.dedup_expiration(),
            dedup_purge_interval: core.dedup_purge_interval(),
            send_timeout: core.send_timeout(),
        }
    }
}

/// 단일 사용 팔로우 감시자
pub struct Watcher<S: RecordSource> {
    /// `watch`가 가져가는 소스 (한 번만 꺼낼 수 있음)
    source: Mutex<Option<S>>,
    boot_time: DateTime<Utc>,
    config: WatcherConfig,
    started: AtomicBool,
    cancel: CancellationToken,
    /// 생성 시점에 no-op 소스였는지 여부 (소스를 꺼낸 뒤에도 유지)
    noop: bool,
}

impl<S: RecordSource> Watcher<S> {
    /// 이미 열린 소스로 감시자를 생성합니다.
    pub fn new(source: S, boot_time: DateTime<Utc>, config: WatcherConfig) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            boot_time,
            config,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            noop: false,
        }
    }

    /// 레코드를 읽어 `tx`로 보냅니다. 종료될 때까지 반환하지 않습니다.
    ///
    /// `close()`, EOF, 수신측 종료 시 `Ok(())`로 끝나며 그 외 I/O 에러나
    /// 파싱 실패는 에러로 반환합니다. 어떤 경우든 반환 시 `tx`가 드롭되어
    /// 수신측은 채널 종료를 관찰합니다.
    pub async fn watch(&self, tx: mpsc::Sender<Message>) -> Result<(), KmsgError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(KmsgError::AlreadyStarted);
        }

        let source = match self.source.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(source) = source else {
            return Err(KmsgError::AlreadyStarted);
        };

        info!(boot_time = %self.boot_time, "kmsg watcher started");
        let result = self.read_follow(source, tx).await;
        match &result {
            Ok(()) => info!("kmsg watcher stopped"),
            Err(e) => warn!(error = %e, "kmsg watcher stopped with error"),
        }
        result
    }

    /// 감시를 중단합니다. 대기 중인 read를 버리고 `watch`가 정상 종료됩니다.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// `close()`가 호출되었는지 여부
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `watch`가 시작되었는지 여부
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// no-op 감시자인지 여부. `watch` 실행 중이나 종료 후에도 같은 값을 반환합니다.
    pub fn is_noop(&self) -> bool {
        self.noop
    }

    async fn read_follow(&self, mut source: S, tx: mpsc::Sender<Message>) -> Result<(), KmsgError> {
        let mut deduper = Deduper::new(
            self.config.dedup_window,
            self.config.dedup_expiration,
            self.config.dedup_purge_interval,
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                res = source.next_record() => res,
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("kmsg stream reached end of file");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    warn!("kmsg pipe error (short read), records were lost");
                    counter!(m::KMSG_OVERFLOW_TOTAL).increment(1);
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(KmsgError::Io(e)),
            };
            if line.is_empty() {
                continue;
            }

            let msg = parse_line(self.boot_time, &line)
                .map_err(|source| KmsgError::Malformed { line, source })?;
            counter!(m::KMSG_MESSAGES_READ_TOTAL).increment(1);

            let count = deduper.record(&msg);
            if count > 1 {
                trace!(count, sequence = msg.sequence_number, "duplicate kmsg suppressed");
                counter!(m::KMSG_MESSAGES_DEDUPED_TOTAL).increment(1);
                continue;
            }

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                res = tx.send_timeout(msg, self.config.send_timeout) => res,
            };
            match sent {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(dropped)) => {
                    warn!(
                        sequence = dropped.sequence_number,
                        timeout_ms = self.config.send_timeout.as_millis() as u64,
                        "kmsg consumer too slow, dropping message"
                    );
                    counter!(m::KMSG_MESSAGES_DROPPED_TOTAL).increment(1);
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!("kmsg receiver closed, stopping watcher");
                    return Ok(());
                }
            }
        }
    }
}

/// 호스트 디바이스 또는 no-op 소스
///
/// 디바이스를 열 수 없는 환경에서도 같은 타입으로 감시자를 구성하기 위해 사용합니다.
pub enum HostSource {
    /// `/dev/kmsg`
    #[cfg(unix)]
    Device(crate::device::FollowDevice),
    /// 아무것도 읽지 않음
    Noop(NoopSource),
}

impl RecordSource for HostSource {
    async fn next_record(&mut self) -> std::io::Result<Option<String>> {
        match self {
            #[cfg(unix)]
            Self::Device(dev) => dev.next_record().await,
            Self::Noop(noop) => noop.next_record().await,
        }
    }
}

impl Watcher<HostSource> {
    /// 디바이스를 열어 감시자를 생성합니다. tokio 런타임 안에서 호출해야 합니다.
    #[cfg(unix)]
    pub fn open(
        path: impl AsRef<Path>,
        boot_time: &dyn BootTimeSource,
        config: WatcherConfig,
    ) -> Result<Self, KmsgError> {
        let device = crate::device::FollowDevice::open(path)?;
        let boot = boot_time.boot_time()?;
        Ok(Self::new(HostSource::Device(device), boot, config))
    }

    /// 디바이스를 열어 감시자를 생성합니다. tokio 런타임 안에서 호출해야 합니다.
    #[cfg(not(unix))]
    pub fn open(
        _path: impl AsRef<Path>,
        _boot_time: &dyn BootTimeSource,
        _config: WatcherConfig,
    ) -> Result<Self, KmsgError> {
        Err(KmsgError::Io(std::io::Error::from(ErrorKind::Unsupported)))
    }

    /// 기본 디바이스(`/dev/kmsg`)와 `/proc/stat` 부팅 시각으로 감시자를 엽니다.
    pub fn open_default(config: WatcherConfig) -> Result<Self, KmsgError> {
        Self::open(
            crate::DEFAULT_DEV_KMSG,
            &crate::boot_time::ProcStatBootTime::new(),
            config,
        )
    }

    /// 디바이스를 열고, 실패하면 no-op 감시자로 대체합니다.
    ///
    /// 비 Linux, 비 root 환경에서 데몬이 죽지 않도록 합니다.
    pub fn open_or_noop(
        path: impl AsRef<Path>,
        boot_time: &dyn BootTimeSource,
        config: WatcherConfig,
    ) -> Self {
        let path = path.as_ref();
        match Self::open(path, boot_time, config.clone()) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "kmsg device unavailable, using no-op watcher"
                );
                Self::noop(config)
            }
        }
    }

    /// 아무것도 읽지 않는 감시자를 생성합니다.
    pub fn noop(config: WatcherConfig) -> Self {
        Self {
            noop: true,
            ..Self::new(HostSource::Noop(NoopSource), Utc::now(), config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    use chrono::TimeZone;

    use crate::boot_time::FixedBootTime;
    use crate::source::ChannelSource;

    fn boot() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn watcher(capacity: usize) -> (mpsc::Sender<io::Result<String>>, Arc<Watcher<ChannelSource>>) {
        let (tx, src) = ChannelSource::new(capacity);
        (tx, Arc::new(Watcher::new(src, boot(), WatcherConfig::default())))
    }

    #[tokio::test]
    async fn forwards_parsed_messages_in_order() {
        let (input, w) = watcher(8);
        let (tx, mut rx) = mpsc::channel(8);

        input.send(Ok("6,1,100,-;first".to_owned())).await.unwrap();
        input.send(Ok("6,2,200,-;second".to_owned())).await.unwrap();
        drop(input);

        w.watch(tx).await.unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!((a.sequence_number, a.message.as_str()), (1, "first"));
        assert_eq!((b.sequence_number, b.message.as_str()), (2, "second"));
        assert!(rx.recv().await.is_none(), "channel must be closed after watch returns");
    }

    #[tokio::test]
    async fn duplicate_lines_within_window_emit_once() {
        let (input, w) = watcher(8);
        let (tx, mut rx) = mpsc::channel(8);

        input.send(Ok("6,1,100,-;dup-line".to_owned())).await.unwrap();
        input.send(Ok("6,2,101,-;dup-line".to_owned())).await.unwrap();
        drop(input);

        w.watch(tx).await.unwrap();

        let only = rx.recv().await.unwrap();
        assert_eq!(only.message, "dup-line");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn second_watch_returns_already_started() {
        let (input, w) = watcher(8);
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        let first = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.watch(tx1).await }
        });
        while !w.is_started() {
            tokio::task::yield_now().await;
        }

        let err = w.watch(tx2).await.unwrap_err();
        assert!(matches!(err, KmsgError::AlreadyStarted));

        input.send(Ok("6,1,1,-;still flowing".to_owned())).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().message, "still flowing");

        w.close();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_stops_blocked_watch() {
        let (_input, w) = watcher(8);
        let (tx, mut rx) = mpsc::channel(8);

        let handle = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.watch(tx).await }
        });
        w.close();

        handle.await.unwrap().unwrap();
        assert!(w.is_closed());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_before_watch_returns_immediately() {
        let (_input, w) = watcher(8);
        let (tx, _rx) = mpsc::channel(8);
        w.close();
        w.watch(tx).await.unwrap();
    }

    #[tokio::test]
    async fn broken_pipe_does_not_stop_watch() {
        let (input, w) = watcher(8);
        let (tx, mut rx) = mpsc::channel(8);

        input.send(Ok("6,1,1,-;a".to_owned())).await.unwrap();
        input
            .send(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
            .await
            .unwrap();
        input.send(Ok("6,5,5,-;b".to_owned())).await.unwrap();
        drop(input);

        w.watch(tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().message, "a");
        assert_eq!(rx.recv().await.unwrap().message, "b");
    }

    #[tokio::test]
    async fn other_io_error_stops_watch_with_error() {
        let (input, w) = watcher(8);
        let (tx, mut rx) = mpsc::channel(8);

        input
            .send(Err(io::Error::from(io::ErrorKind::PermissionDenied)))
            .await
            .unwrap();

        let err = w.watch(tx).await.unwrap_err();
        assert!(matches!(err, KmsgError::Io(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn malformed_record_is_fatal() {
        let (input, w) = watcher(8);
        let (tx, _rx) = mpsc::channel(8);

        input.send(Ok("not a kmsg record".to_owned())).await.unwrap();

        let err = w.watch(tx).await.unwrap_err();
        assert!(matches!(err, KmsgError::Malformed { .. }));
    }

    #[tokio::test]
    async fn receiver_drop_ends_watch() {
        let (input, w) = watcher(8);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        input.send(Ok("6,1,1,-;nobody listens".to_owned())).await.unwrap();
        w.watch(tx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_drops_message_after_timeout() {
        let (input, w) = watcher(8);
        let (tx, mut rx) = mpsc::channel(1);

        input.send(Ok("6,1,1,-;fills channel".to_owned())).await.unwrap();
        input.send(Ok("6,2,2,-;dropped".to_owned())).await.unwrap();
        input.send(Ok("6,3,3,-;after drop".to_owned())).await.unwrap();
        drop(input);

        let handle = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.watch(tx).await }
        });

        // 첫 메시지가 채널을 채운 채로 전송 한도가 지나도록 둡니다.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(rx.recv().await.unwrap().message, "fills channel");
        assert_eq!(rx.recv().await.unwrap().message, "after drop");
        assert!(rx.recv().await.is_none());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn noop_watcher_runs_until_closed() {
        let w = Arc::new(Watcher::noop(WatcherConfig::default()));
        assert!(w.is_noop());
        let (tx, mut rx) = mpsc::channel(1);

        let handle = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.watch(tx).await }
        });
        w.close();
        handle.await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn noop_flag_survives_watch() {
        let w = Arc::new(Watcher::noop(WatcherConfig::default()));
        let (tx, _rx) = mpsc::channel(1);

        let handle = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.watch(tx).await }
        });
        while !w.is_started() {
            tokio::task::yield_now().await;
        }
        // 소스는 이미 watch가 가져간 상태
        assert!(w.is_noop());

        w.close();
        handle.await.unwrap().unwrap();
        assert!(w.is_noop());
    }

    #[tokio::test]
    async fn channel_watcher_is_not_noop() {
        let (_input, w) = watcher(1);
        assert!(!w.is_noop());
    }

    #[tokio::test]
    async fn open_or_noop_falls_back_on_missing_device() {
        let w = Watcher::open_or_noop(
            "/nonexistent/gpuhealth/kmsg",
            &FixedBootTime(boot()),
            WatcherConfig::default(),
        );
        assert!(w.is_noop());
    }

    #[test]
    fn config_from_core() {
        let core = KmsgConfig {
            dedup_window_secs: 30,
            send_timeout_ms: 250,
            ..KmsgConfig::default()
        };
        let cfg = WatcherConfig::from_core(&core);
        assert_eq!(cfg.dedup_window, Duration::from_secs(30));
        assert_eq!(cfg.send_timeout, Duration::from_millis(250));
    }
}
