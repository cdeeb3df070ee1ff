#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use chrono::{TimeZone, Utc};
use gpuhealth_kmsg::{Deduper, Message};
use libfuzzer_sys::fuzz_target;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    window_secs: u8,
    records: Vec<FuzzRecord>,
}

#[derive(Arbitrary, Debug)]
struct FuzzRecord {
    /// 부팅 후 오프셋 (초)
    offset_secs: u16,
    /// 이전 레코드 이후 경과 시간 (밀리초)
    elapsed_ms: u16,
    text: String,
}

fuzz_target!(|input: FuzzInput| {
    let window = Duration::from_secs(u64::from(input.window_secs.max(1)));
    let mut deduper = Deduper::new(window, Duration::from_secs(60), Duration::from_secs(10));
    let boot = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut now = Instant::now();

    for (seq, rec) in input.records.iter().take(256).enumerate() {
        now += Duration::from_millis(u64::from(rec.elapsed_ms));
        let msg = Message {
            priority: 6,
            sequence_number: seq as i64,
            timestamp: boot + chrono::Duration::seconds(i64::from(rec.offset_secs)),
            message: rec.text.clone(),
        };
        // 같은 키의 첫 관측은 항상 1
        assert!(deduper.record_at(&msg, now) >= 1);
    }
});
