#![no_main]

use gpuhealth_kmsg::writer::message::{MAX_PRINTK_RECORD_LENGTH, format_record};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u8, String)| {
    let (level, text) = input;
    match format_record(level, &text) {
        Some(out) => {
            assert!(out.len() <= MAX_PRINTK_RECORD_LENGTH);
            assert!(out.ends_with('\n'));
        }
        None => assert!(text.is_empty()),
    }
});
