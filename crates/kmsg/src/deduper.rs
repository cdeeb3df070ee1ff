//! 시간 창 기반 메시지 중복 제거
//!
//! 같은 시간 창(기본 60초)에 속한 동일한 본문의 메시지를 하나로 묶어 발생 횟수를 셉니다.
//! 우선순위와 시퀀스 번호는 키에서 제외되므로, 커널이 같은 내용을 다시 기록해도
//! 하나로 합쳐집니다.
//!
//! 창은 슬라이딩 창이 아니라 고정 버킷입니다. 버킷 경계 직전과 직후에 도착한
//! 같은 메시지는 서로 다른 첫 발생으로 취급되며, 이는 의도된 동작입니다.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::parser::Message;

/// 중복 제거 캐시
pub struct Deduper {
    /// 버킷 크기 (초, 최소 1)
    window_secs: i64,
    /// 항목 만료 시간 (첫 삽입 기준)
    expiration: Duration,
    /// 만료 항목 일괄 정리 주기
    purge_interval: Duration,
    /// 키 -> 발생 기록
    entries: HashMap<String, Occurrence>,
    /// 마지막 일괄 정리 시각
    last_purge: Instant,
}

struct Occurrence {
    count: u32,
    first_seen: Instant,
}

impl Deduper {
    /// 새 중복 제거 캐시를 생성합니다.
    pub fn new(window: Duration, expiration: Duration, purge_interval: Duration) -> Self {
        Self {
            window_secs: window.as_secs().clamp(1, i64::MAX as u64) as i64,
            expiration,
            purge_interval,
            entries: HashMap::new(),
            last_purge: Instant::now(),
        }
    }

    /// 메시지를 기록하고 현재 창에서의 발생 횟수를 반환합니다.
    ///
    /// 처음 보는 메시지면 1, 두 번째면 2를 반환합니다.
    pub fn record(&mut self, msg: &Message) -> u32 {
        self.record_at(msg, Instant::now())
    }

    /// 주어진 시각을 기준으로 메시지를 기록합니다.
    pub fn record_at(&mut self, msg: &Message, now: Instant) -> u32 {
        if now.duration_since(self.last_purge) >= self.purge_interval {
            self.purge_expired(now);
        }

        let key = dedup_key(msg.timestamp, &msg.message, self.window_secs);
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                let occ = entry.get_mut();
                if now.duration_since(occ.first_seen) >= self.expiration {
                    *occ = Occurrence {
                        count: 1,
                        first_seen: now,
                    };
                } else {
                    occ.count = occ.count.saturating_add(1);
                }
                occ.count
            }
            Entry::Vacant(entry) => {
                entry.insert(Occurrence {
                    count: 1,
                    first_seen: now,
                });
                1
            }
        }
    }

    /// 캐시에 남아 있는 키 개수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 캐시가 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&mut self, now: Instant) {
        let expiration = self.expiration;
        self.entries
            .retain(|_, occ| now.duration_since(occ.first_seen) < expiration);
        self.last_purge = now;
    }
}

/// `"{버킷 시작 unix 초}-{본문}"` 형식의 키를 만듭니다.
pub fn dedup_key(timestamp: DateTime<Utc>, text: &str, window_secs: i64) -> String {
    let ts = timestamp.timestamp();
    let bucket = ts - ts.rem_euclid(window_secs.max(1));
    format!("{bucket}-{text}")
}
