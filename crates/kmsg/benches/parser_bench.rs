//! kmsg 레코드 파서 벤치마크
//!
//! 짧은/긴 레코드와 추가 메타데이터 필드가 있는 레코드의 파싱 처리량을 측정합니다.

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gpuhealth_kmsg::parse_line;

/// 일반적인 짧은 레코드
const SHORT: &str = "6,2565,102258085667,-;docker0: port 2 entered blocking state";

/// GPU Xid 레코드
const XID: &str = "3,13487,8471213003,-;NVRM: Xid (PCI:0000:b5:00): 79, pid=0, name=, GPU has fallen off the bus.";

/// 추가 메타데이터 필드가 있는 긴 레코드
const LONG_WITH_FIELDS: &str = "4,98211,1234567890123,c,caller=T1234,extra=1;nvidia-nvswitch3: SXid (PCI:0000:c3:00.0): 20034, Fatal, Link 30 LTSSM Fault Up, data {0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000, 0x00000000}";

fn bench_parse_line(c: &mut Criterion) {
    let boot = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let mut group = c.benchmark_group("kmsg_parse_line");

    group.throughput(Throughput::Elements(1));
    group.bench_function("short", |b| {
        b.iter(|| parse_line(boot, black_box(SHORT)).unwrap())
    });

    group.bench_function("xid", |b| {
        b.iter(|| parse_line(boot, black_box(XID)).unwrap())
    });

    group.bench_function("long_with_fields", |b| {
        b.iter(|| parse_line(boot, black_box(LONG_WITH_FIELDS)).unwrap())
    });

    // 1000건 반복 처리량
    group.throughput(Throughput::Elements(1000));
    group.bench_function("throughput_1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                parse_line(boot, black_box(XID)).unwrap();
            }
        })
    });

    group.finish();
}

fn bench_parse_invalid(c: &mut Criterion) {
    let boot = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    c.bench_function("kmsg_parse_line_missing_delimiter", |b| {
        b.iter(|| parse_line(boot, black_box("6,1,100,- no delimiter here")).is_err())
    });
}

criterion_group!(benches, bench_parse_line, bench_parse_invalid);
criterion_main!(benches);
