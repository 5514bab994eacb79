//! `spool` 集成测试：容量触发刷新、周期刷新、显式刷新与关闭顺序。

mod support;

use std::{io::Write, time::Duration};

use spark_stream::{Close, Operation, SpoolConfig, SpooledWriter, StreamError};
use support::{FailingEndpoint, MemoryEndpoint, eventually};

const NEVER: Duration = Duration::from_secs(3600);

fn spooled(
    endpoint: &MemoryEndpoint,
    buffer_size: usize,
    period: Duration,
) -> SpooledWriter<MemoryEndpoint> {
    let config = SpoolConfig::default()
        .with_buffer_size(buffer_size)
        .with_flush_period(period);
    SpooledWriter::with_config(endpoint.clone(), config).expect("构造缓冲写入器失败")
}

#[test]
fn small_writes_wait_for_the_periodic_flush() {
    let endpoint = MemoryEndpoint::new();
    let mut writer = spooled(&endpoint, 64, Duration::from_millis(200));

    assert_eq!(writer.write(b"abc").expect("写入失败"), 3);
    assert!(endpoint.contents().is_empty());
    assert!(eventually(Duration::from_secs(5), || endpoint.contents() == b"abc"));
    assert_eq!(writer.buffered(), 0);

    writer.close().expect("关闭失败");
}

#[test]
fn writes_beyond_capacity_reach_the_endpoint_without_the_timer() {
    let endpoint = MemoryEndpoint::new();
    let mut writer = spooled(&endpoint, 4, NEVER);

    writer.write_all(b"abcdefgh").expect("写入失败");
    assert_eq!(endpoint.contents(), b"abcdefgh");

    writer.write_all(b"ij").expect("写入失败");
    assert_eq!(endpoint.contents(), b"abcdefgh");
    assert_eq!(writer.buffered(), 2);

    writer.close().expect("关闭失败");
    assert_eq!(endpoint.contents(), b"abcdefghij");
}

#[test]
fn explicit_flush_drains_the_buffer() {
    let endpoint = MemoryEndpoint::new();
    let mut writer = spooled(&endpoint, 64, NEVER);

    writer.write_all(b"spooled").expect("写入失败");
    assert!(endpoint.contents().is_empty());
    writer.flush().expect("刷新失败");
    assert_eq!(endpoint.contents(), b"spooled");
    writer.close().expect("关闭失败");
}

#[test]
fn close_flushes_then_closes_and_rejects_later_calls() {
    let endpoint = MemoryEndpoint::new();
    let mut writer = spooled(&endpoint, 64, NEVER);
    writer.write_all(b"tail").expect("写入失败");

    writer.close().expect("关闭失败");
    assert_eq!(endpoint.contents(), b"tail");
    assert_eq!(endpoint.close_count(), 1);

    for (err, operation) in [
        (writer.write(b"late").expect_err("关闭后写入必须失败"), Operation::Write),
        (writer.flush().expect_err("关闭后刷新必须失败"), Operation::Flush),
        (writer.close().expect_err("重复关闭必须失败"), Operation::Close),
    ] {
        match StreamError::from_io(&err) {
            Some(StreamError::UsedAfterClose { operation: seen }) => assert_eq!(*seen, operation),
            other => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(endpoint.close_count(), 1);
}

#[test]
fn endpoint_close_error_wins_over_flush_error() {
    let config = SpoolConfig::default().with_flush_period(NEVER);
    let mut writer = SpooledWriter::with_config(FailingEndpoint::new(), config).expect("构造失败");
    writer.write_all(b"stuck").expect("写入只进入缓冲");

    let err = writer.close().expect_err("关闭必须失败");
    assert_eq!(err.to_string(), "close refused");
}

#[test]
fn flush_error_is_returned_when_close_succeeds() {
    let endpoint = MemoryEndpoint::new();
    let failing = support::ShortEndpoint::new(endpoint.clone(), 0);
    let config = SpoolConfig::default().with_flush_period(NEVER);
    let mut writer = SpooledWriter::with_config(failing, config).expect("构造失败");
    writer.write_all(b"never lands").expect("写入只进入缓冲");

    let err = writer.close().expect_err("最终刷新失败必须返回");
    assert_eq!(err.kind(), std::io::ErrorKind::WriteZero);
    assert_eq!(endpoint.close_count(), 1);
}

#[test]
fn zero_configuration_is_rejected() {
    let zero_buffer = SpoolConfig::default().with_buffer_size(0);
    let err = SpooledWriter::with_config(MemoryEndpoint::new(), zero_buffer)
        .expect_err("零容量必须被拒绝");
    assert!(matches!(err, StreamError::InvalidConfig { field: "buffer_size", .. }));

    let zero_period = SpoolConfig::default().with_flush_period(Duration::ZERO);
    let err = SpooledWriter::with_config(MemoryEndpoint::new(), zero_period)
        .expect_err("零周期必须被拒绝");
    assert!(matches!(err, StreamError::InvalidConfig { field: "flush_period", .. }));
}

#[test]
fn dropping_the_writer_flushes_and_closes() {
    let endpoint = MemoryEndpoint::new();
    {
        let mut writer = spooled(&endpoint, 64, NEVER);
        writer.write_all(b"dropped").expect("写入失败");
    }
    assert_eq!(endpoint.contents(), b"dropped");
    assert_eq!(endpoint.close_count(), 1);
}

#[test]
fn default_configuration_is_used_by_new() {
    let writer = SpooledWriter::new(MemoryEndpoint::new()).expect("构造失败");
    assert_eq!(*writer.config(), SpoolConfig::default());
}
