//! `fanout` 集成测试：广播、失败成员驱逐、关闭聚合与并发写入。

mod support;

use std::{io::Write, thread};

use proptest::prelude::*;
use spark_stream::{Close, FanOutCore, FanOutWriter, MultiWriter, Sink, StreamError};
use support::{FailingEndpoint, MemoryEndpoint, ShortEndpoint};

fn send<M: MultiWriter>(writer: &mut M, data: &[u8], series: bool) -> usize {
    if series {
        writer.broadcast_series(data)
    } else {
        writer.broadcast(data)
    }
}

/// 两个内存端点写入 "blob"；把其中一个换成短写端点后，一次写入即可把它驱逐。
fn blob_scenario<M: MultiWriter>(writer: &mut M, series: bool) {
    let first = MemoryEndpoint::new();
    let second = MemoryEndpoint::new();
    let first_sink = Sink::new(first.clone());
    let second_sink = Sink::new(second.clone());
    writer.add(first_sink.clone());
    writer.add(second_sink.clone());

    assert_eq!(send(writer, b"blob", series), 4);
    assert_eq!(first.contents(), b"blob");
    assert_eq!(second.contents(), b"blob");

    let short = MemoryEndpoint::new();
    assert!(writer.remove(&second_sink));
    writer.add(Sink::new(ShortEndpoint::new(short.clone(), 1)));
    assert_eq!(writer.len(), 2);

    assert_eq!(send(writer, b"blob", series), 4);
    assert_eq!(writer.len(), 1);
    assert!(writer.contains(&first_sink));
    assert!(!writer.is_empty());
    assert_eq!(first.contents(), b"blobblob");
    assert_eq!(short.close_count(), 1);
    // 被移除的成员不会被关闭。
    assert_eq!(second.close_count(), 0);

    assert!(writer.remove(&first_sink));
    assert!(writer.is_empty());
    assert_eq!(first.close_count(), 0);
}

#[test]
fn blob_scenario_parallel_locking() {
    blob_scenario(&mut FanOutWriter::new(), false);
}

#[test]
fn blob_scenario_series_locking() {
    blob_scenario(&mut FanOutWriter::new(), true);
}

#[test]
fn blob_scenario_parallel_core() {
    blob_scenario(&mut FanOutCore::new(), false);
}

#[test]
fn blob_scenario_series_core() {
    blob_scenario(&mut FanOutCore::new(), true);
}

#[test]
fn write_reports_full_length_even_when_every_member_fails() {
    let failing = FailingEndpoint::new();
    let mut writer = FanOutWriter::with_sinks([Sink::new(failing.clone())]);
    assert_eq!(writer.write(b"lost").expect("扇出写入不报告成员错误"), 4);
    assert!(writer.is_empty());
    assert_eq!(failing.close_count(), 1);

    assert_eq!(writer.write(b"nobody").expect("空集合写入同样成功"), 6);
}

#[test]
fn flush_evicts_members_that_fail_to_flush() {
    let healthy = MemoryEndpoint::new();
    let failing = FailingEndpoint::new();
    let mut core =
        FanOutCore::with_sinks([Sink::new(healthy.clone()), Sink::new(failing.clone())]);

    core.flush().expect("扇出刷新不报告成员错误");
    assert_eq!(core.len(), 1);
    assert_eq!(failing.close_count(), 1);
    assert_eq!(healthy.close_count(), 0);
}

#[test]
fn close_aggregates_every_member_error() {
    let refusing = [MemoryEndpoint::refusing_close(), MemoryEndpoint::refusing_close()];
    let healthy = MemoryEndpoint::new();
    let writer = FanOutWriter::with_sinks(
        refusing
            .iter()
            .cloned()
            .chain([healthy.clone()])
            .map(Sink::new),
    );

    let errors = writer.close_all().expect_err("两个成员关闭失败");
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|err| err.to_string() == "close refused"));
    assert!(writer.is_empty());
    for endpoint in refusing.iter().chain([&healthy]) {
        assert_eq!(endpoint.close_count(), 1);
    }
}

#[test]
fn close_trait_boxes_aggregated_errors() {
    let mut core = FanOutCore::with_sinks([Sink::new(MemoryEndpoint::refusing_close())]);
    let err = core.close().expect_err("成员关闭失败必须返回");
    match StreamError::from_io(&err) {
        Some(StreamError::Close(errors)) => assert_eq!(errors.len(), 1),
        other => panic!("unexpected error: {other:?}"),
    }

    let mut empty = FanOutWriter::new();
    empty.close().expect("空集合关闭成功");
}

#[test]
fn concurrent_writers_close_a_failed_member_once() {
    let healthy = MemoryEndpoint::new();
    let failing = FailingEndpoint::new();
    let writer =
        FanOutWriter::with_sinks([Sink::new(healthy.clone()), Sink::new(failing.clone())]);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let mut shared = &writer;
                for _ in 0..16 {
                    shared.write_all(b"x").expect("扇出写入不报告成员错误");
                }
            });
        }
    });

    assert_eq!(failing.close_count(), 1);
    assert_eq!(writer.len(), 1);
    assert_eq!(healthy.contents().len(), 8 * 16);
}

#[test]
fn the_same_sink_may_join_several_writers() {
    let endpoint = MemoryEndpoint::new();
    let sink = Sink::new(endpoint.clone());
    let left = FanOutWriter::with_sinks([sink.clone()]);
    let right = FanOutWriter::with_sinks([sink.clone()]);

    left.broadcast(b"l");
    right.broadcast_series(b"r");
    assert_eq!(endpoint.contents(), b"lr");
    assert!(left.contains(&sink) && right.contains(&sink));
}

proptest! {
    /// 任意健康/失败组合下，一次广播之后集合恰好只剩健康成员，失败成员各被关闭一次。
    #[test]
    fn membership_after_mixed_failures(
        health in proptest::collection::vec(any::<bool>(), 0..12),
        series in any::<bool>(),
    ) {
        let healthy: Vec<MemoryEndpoint> = health
            .iter()
            .filter(|ok| **ok)
            .map(|_| MemoryEndpoint::new())
            .collect();
        let failing: Vec<FailingEndpoint> = health
            .iter()
            .filter(|ok| !**ok)
            .map(|_| FailingEndpoint::new())
            .collect();
        let writer = FanOutWriter::with_sinks(
            healthy
                .iter()
                .cloned()
                .map(Sink::new)
                .chain(failing.iter().cloned().map(Sink::new)),
        );

        let written = if series {
            writer.broadcast_series(b"data")
        } else {
            writer.broadcast(b"data")
        };
        prop_assert_eq!(written, 4);
        prop_assert_eq!(writer.len(), healthy.len());
        prop_assert_eq!(writer.is_empty(), healthy.is_empty());
        for endpoint in &healthy {
            prop_assert_eq!(endpoint.contents(), b"data".to_vec());
            prop_assert_eq!(endpoint.close_count(), 0);
        }
        for endpoint in &failing {
            prop_assert_eq!(endpoint.close_count(), 1);
        }
    }
}
