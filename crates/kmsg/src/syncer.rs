//! 싱커 — 감시자가 보낸 메시지를 이벤트로 변환해 버킷에 기록합니다.
//!
//! 감시 태스크와 동기화 태스크 두 개를 띄웁니다. 버킷 조회/삽입 실패는
//! 로그만 남기고 다음 메시지로 넘어갑니다.
//!
//! 같은 `(time, name, type)` 이벤트가 이미 있으면 삽입하지 않습니다.
//! 조회 후 삽입은 원자적이지 않으므로 여러 싱커가 같은 버킷에 쓰면 드물게
//! 중복이 생길 수 있습니다.

use std::sync::Arc;
use std::time::Duration;

use gpuhealth_core::metrics as m;
use gpuhealth_core::types::{Event, EventType};
use gpuhealth_eventstore::Bucket;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::error::KmsgError;
use crate::parser::Message;
use crate::source::RecordSource;
use crate::watcher::{HostSource, Watcher, WatcherConfig};

/// 원본 커널 로그 줄을 담는 extra_info 키
pub const EXTRA_INFO_KEY_LOG_LINE: &str = "log_line";

/// 기본 버킷 작업 타임아웃
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// 기본 감시자 채널 용량
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// 커널 로그 줄을 `(이벤트 이름, 메시지)`로 분류하는 함수
///
/// 빈 이름은 관심 없는 줄을 뜻합니다.
pub type MatchFn = Arc<dyn Fn(&str) -> (String, String) + Send + Sync>;

type OpenWatcher<S> = Box<dyn FnOnce(WatcherConfig) -> Result<Watcher<S>, KmsgError> + Send>;

enum WatcherSlot<S: RecordSource> {
    Ready(Arc<Watcher<S>>),
    Open(OpenWatcher<S>),
}

/// 메시지 하나의 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 매치 함수가 관심 없다고 판단
    Unmatched,
    /// 같은 이벤트가 이미 존재
    AlreadyExists,
    /// 새로 기록함
    Inserted,
    /// 조회 또는 삽입 실패 (로그만 남김)
    Failed,
}

/// [`Syncer`] 빌더
///
/// # 사용 예시
/// ```ignore
/// let syncer = SyncerBuilder::new(bucket, match_fn)
///     .watcher_config(WatcherConfig::from_core(&config.kmsg))
///     .op_timeout(Duration::from_secs(5))
///     .build(cancel.clone())?;
/// ```
pub struct SyncerBuilder<S: RecordSource, B: Bucket> {
    bucket: Arc<B>,
    match_fn: MatchFn,
    watcher: WatcherSlot<S>,
    watcher_config: WatcherConfig,
    event_type: EventType,
    op_timeout: Duration,
    channel_capacity: usize,
}

impl<B: Bucket> SyncerBuilder<HostSource, B> {
    /// 새 빌더를 생성합니다. 감시자를 지정하지 않으면 기본 디바이스를 엽니다.
    pub fn new(bucket: Arc<B>, match_fn: MatchFn) -> Self {
        Self {
            bucket,
            match_fn,
            watcher: WatcherSlot::Open(Box::new(Watcher::open_default)),
            watcher_config: WatcherConfig::default(),
            event_type: EventType::Warning,
            op_timeout: DEFAULT_OP_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl<S: RecordSource, B: Bucket> SyncerBuilder<S, B> {
    /// 이미 생성된 감시자를 사용합니다.
    pub fn watcher<S2: RecordSource>(self, watcher: Arc<Watcher<S2>>) -> SyncerBuilder<S2, B> {
        SyncerBuilder {
            bucket: self.bucket,
            match_fn: self.match_fn,
            watcher: WatcherSlot::Ready(watcher),
            watcher_config: self.watcher_config,
            event_type: self.event_type,
            op_timeout: self.op_timeout,
            channel_capacity: self.channel_capacity,
        }
    }

    /// 기본 감시자를 열 때 사용할 설정
    pub fn watcher_config(mut self, config: WatcherConfig) -> Self {
        self.watcher_config = config;
        self
    }

    /// 기록할 이벤트 타입
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// 버킷 조회/삽입 각각의 타임아웃
    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// 감시자와 싱커 사이 채널 용량
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// 감시 태스크와 동기화 태스크를 띄웁니다.
    ///
    /// tokio 런타임 안에서 호출해야 합니다. `cancel`이 취소되면 동기화 루프가
    /// 끝나고 감시자도 닫힙니다.
    pub fn build(self, cancel: CancellationToken) -> Result<Syncer<S>, KmsgError> {
        if self.channel_capacity == 0 {
            return Err(KmsgError::Config {
                field: "channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.op_timeout.is_zero() {
            return Err(KmsgError::Config {
                field: "op_timeout".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        let watcher = match self.watcher {
            WatcherSlot::Ready(w) => w,
            WatcherSlot::Open(open) => Arc::new(open(self.watcher_config)?),
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let watch_task = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch(tx).await })
        };

        let sync_task = {
            let ctx = SyncContext {
                bucket: self.bucket,
                match_fn: self.match_fn,
                event_type: self.event_type,
                op_timeout: self.op_timeout,
            };
            let watcher = Arc::clone(&watcher);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                ctx.run(rx, cancel).await;
                // 취소로 끝난 경우 감시자도 함께 멈춥니다.
                watcher.close();
            })
        };

        info!(
            channel_capacity = self.channel_capacity,
            op_timeout_ms = self.op_timeout.as_millis() as u64,
            "kmsg syncer started"
        );

        Ok(Syncer {
            watcher,
            watch_task,
            sync_task,
        })
    }
}

/// 실행 중인 싱커 핸들
pub struct Syncer<S: RecordSource> {
    watcher: Arc<Watcher<S>>,
    watch_task: JoinHandle<Result<(), KmsgError>>,
    sync_task: JoinHandle<()>,
}

impl<S: RecordSource> Syncer<S> {
    /// 감시자를 닫습니다. 채널이 닫히면 동기화 루프도 끝납니다.
    pub fn close(&self) {
        self.watcher.close();
    }

    /// 사용 중인 감시자
    pub fn watcher(&self) -> &Arc<Watcher<S>> {
        &self.watcher
    }

    /// 두 태스크가 끝날 때까지 기다리고 감시자의 결과를 반환합니다.
    pub async fn wait(self) -> Result<(), KmsgError> {
        self.sync_task
            .await
            .map_err(|e| KmsgError::Task(format!("sync task: {e}")))?;
        let result = self
            .watch_task
            .await
            .map_err(|e| KmsgError::Task(format!("watch task: {e}")))?;
        info!("kmsg syncer stopped");
        result
    }
}

struct SyncContext<B: Bucket> {
    bucket: Arc<B>,
    match_fn: MatchFn,
    event_type: EventType,
    op_timeout: Duration,
}

impl<B: Bucket> SyncContext<B> {
    async fn run(&self, mut rx: mpsc::Receiver<Message>, cancel: CancellationToken) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("kmsg syncer cancelled");
                    return;
                }
                msg = rx.recv() => msg,
            };
            let Some(msg) = msg else {
                debug!("kmsg watcher channel closed");
                return;
            };
            sync_message(
                self.bucket.as_ref(),
                &self.match_fn,
                self.event_type,
                self.op_timeout,
                &msg,
            )
            .await;
        }
    }
}

/// 메시지 하나를 매치하고, 새 이벤트면 버킷에 기록합니다.
pub async fn sync_message<B: Bucket>(
    bucket: &B,
    match_fn: &MatchFn,
    event_type: EventType,
    op_timeout: Duration,
    msg: &Message,
) -> SyncOutcome {
    let (name, message) = match_fn(&msg.message);
    if name.is_empty() {
        trace!(line = %msg.message, "kmsg line did not match");
        return SyncOutcome::Unmatched;
    }

    let mut event = Event::new(msg.timestamp, name, event_type).with_message(message);

    match tokio::time::timeout(op_timeout, bucket.find(&event)).await {
        Ok(Ok(Some(_))) => {
            debug!(name = %event.name, time = %event.time, "event already exists");
            return SyncOutcome::AlreadyExists;
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            error!(bucket = bucket.name(), error = %e, "failed to find event");
            return SyncOutcome::Failed;
        }
        Err(_) => {
            error!(bucket = bucket.name(), "timed out finding event");
            return SyncOutcome::Failed;
        }
    }

    event = event.with_extra_info(EXTRA_INFO_KEY_LOG_LINE, msg.message.as_str());

    match tokio::time::timeout(op_timeout, bucket.insert(&event)).await {
        Ok(Ok(())) => {
            counter!(m::KMSG_SYNCER_EVENTS_INSERTED_TOTAL, m::LABEL_TABLE => bucket.name().to_owned())
                .increment(1);
            info!(name = %event.name, time = %event.time, "inserted kmsg event");
            SyncOutcome::Inserted
        }
        Ok(Err(e)) => {
            error!(bucket = bucket.name(), error = %e, "failed to insert event");
            SyncOutcome::Failed
        }
        Err(_) => {
            error!(bucket = bucket.name(), "timed out inserting event");
            SyncOutcome::Failed
        }
    }
}
