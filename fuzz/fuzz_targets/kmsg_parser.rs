#![no_main]

use chrono::{TimeZone, Utc};
use gpuhealth_kmsg::parse_line;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let boot = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        if let Ok(msg) = parse_line(boot, line) {
            // 본문은 항상 원본 줄의 접미사
            assert!(line.ends_with(&msg.message));
        }
    }
});
