#![deny(unsafe_code)]
#![doc = r#"
# spark-stream

## 设计动机（Why）
- **定位**：为同步字节流端点（`std::io::Read` / `std::io::Write` + [`Close`]）提供一组
  并发装饰器：单次调用超时、后台周期刷新、扇出复制与引用计数共享关闭。
- **共同难题**：端点的读写调用是阻塞的，且无法从外部取消某一次正在执行的调用；
  所有装饰器都以“单个后台 worker + 容量为 1 的交接通道”作为统一解法，
  并严格定义关闭语义，确保在途工作既不会被静默丢弃，也不会泄漏。
- **基线**：[`LockingWriter`] 只做互斥，不引入后台线程，作为其它装饰器的性能与语义基线。

## 核心契约（What）
- 装饰器包装一个已经打开的端点，并在自身 `close` 时回收全部资源；
- 关闭之后的调用一律返回 [`StreamError::UsedAfterClose`]，不会阻塞也不会 panic；
- 超时只意味着“放弃等待”，底层调用仍会在 worker 中自然结束，结果被丢弃；
- 扇出写入永远报告完整长度，失败成员只会通过成员集合的变化体现。

## 实现策略（How）
- `job` 模块封装 Job/Result 交接模式：`sync_channel(1)` + `try_send`，每个 Job 携带私有结果通道；
- [`timed`] 以 `recv_timeout` 在结果与计时器之间竞速；
- [`spool`] 的 worker 同时复用交接通道与刷新截止时间；
- [`fanout`] 借助 `std::thread::scope` 并行写入快照中的所有成员；
- [`dup`] 以原子计数 + 一次性触发替代嵌套等待组。

## 风险与考量（Trade-offs）
- 每个超时/缓冲装饰器独占一个 OS 线程，实例数量较多时需评估线程开销；
- 写入负载跨线程传递时需要复制一份 `Bytes`，换取调用方缓冲区的生命周期自由；
- 未提供真正的调用取消：被放弃的阻塞调用仍会占用其 worker 直至返回。
"#]

pub mod config;
pub mod dup;
pub mod endpoint;
pub mod error;
pub mod fanout;
mod job;
pub mod locking;
pub mod spool;
pub mod timed;

pub use config::{SpoolConfig, TimeoutConfig};
pub use dup::DupWriter;
pub use endpoint::{Close, NopClose, ReadClose, WriteClose};
pub use error::{CloseErrors, Operation, Recovery, StreamError};
pub use fanout::{FanOutCore, FanOutWriter, MultiWriter, Sink, SinkId};
pub use locking::LockingWriter;
pub use spool::SpooledWriter;
pub use timed::{TimedReader, TimedWriter};
