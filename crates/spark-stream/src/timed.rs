//! 超时装饰器：为每一次读/写调用施加固定时限。
//!
//! # 教案级导览
//!
//! - **Why**：阻塞的端点调用无法被外部取消。装饰器把调用交给后台 worker 执行，
//!   调用方只在“结果到达”与“计时器到期”之间二选一，从而保证调用方永远不会阻塞超过时限。
//! - **How**：基于 `job` 模块的交接通道；worker 独占端点，调用方以 `recv_timeout` 等待结果。
//!   超时后直接返回 [`StreamError::Timeout`]，底层调用仍在 worker 中继续执行，其结果写入
//!   已被放弃的结果通道后不会再被任何调用方观察到。
//! - **What**：
//!   - 零时限属于编程错误，`new` 直接 panic；
//!     `try_new`/`with_config` 返回 [`StreamError::InvalidConfig`]；
//!   - 关闭后再调用返回 [`StreamError::UsedAfterClose`]；
//!   - 若上一次超时的 Job 仍滞留在槽位中，本次调用立即返回超时，因为它不可能按时完成。
//! - **Trade-offs**：
//!   - “绝不阻塞超过时限”优先于“绝不丢弃已完成的结果”；
//!   - 没有被放弃的调用时，关闭一直等到 worker 关闭端点，并返回端点的关闭结果；
//!   - 存在尚未了结的被放弃调用时，关闭最多等待 `max(timeout, 250ms)`；若 worker 仍卡在该调用里，
//!     关闭返回成功，端点改由 worker 在调用结束后自行关闭，失败时记录 `warn` 日志。

use std::{
    fmt,
    io::{self, Read, Write},
    sync::mpsc::RecvTimeoutError,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::{
    config::TimeoutConfig,
    endpoint::{Close, ReadClose, WriteClose},
    error::{Operation, StreamError},
    job::{self, Handoff, Rejected, Retired, Retirement},
};

/// 关闭时等待 worker 退出的最短宽限期。
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// 读写两种超时装饰器共享的状态机。
struct Timed<P, T> {
    handoff: Handoff<P, io::Result<T>>,
    retirement: Option<Retirement>,
    timeout: Duration,
    halted: bool,
    /// 存在一个超时后被放弃、worker 可能仍在执行的调用。
    abandoned: bool,
}

impl<P, T> Timed<P, T>
where
    P: Send + 'static,
    T: Send + 'static,
{
    fn start<E, F>(
        name: &'static str,
        endpoint: E,
        config: TimeoutConfig,
        serve: F,
    ) -> Result<Self, StreamError>
    where
        E: Close + Send + 'static,
        F: FnMut(&mut E, P) -> io::Result<T> + Send + 'static,
    {
        config.validate()?;
        let (handoff, inbox) = Handoff::new();
        let retirement = job::serve_until_closed(name, endpoint, inbox, serve)?;
        Ok(Self {
            handoff,
            retirement: Some(retirement),
            timeout: config.timeout(),
            halted: false,
            abandoned: false,
        })
    }

    fn call(&mut self, operation: Operation, payload: P) -> io::Result<T> {
        if self.halted {
            return Err(StreamError::used_after_close(operation).into());
        }
        let outcome = match self.handoff.submit(payload) {
            Ok(outcome) => outcome,
            Err(Rejected::Occupied) => {
                self.abandoned = true;
                debug!(
                    %operation,
                    timeout = ?self.timeout,
                    "worker backlogged by an abandoned call"
                );
                return Err(StreamError::Timeout(self.timeout).into());
            }
            Err(Rejected::Retired) => return Err(StreamError::WorkerExited.into()),
        };
        match outcome.recv_timeout(self.timeout) {
            Ok(result) => {
                // worker 按序执行 Job，本次结果到达说明此前被放弃的调用都已结束。
                self.abandoned = false;
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abandoned = true;
                debug!(%operation, timeout = ?self.timeout, "call abandoned after timeout");
                Err(StreamError::Timeout(self.timeout).into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(StreamError::WorkerExited.into()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if self.halted {
            return Err(StreamError::used_after_close(Operation::Close).into());
        }
        self.handoff.close();
        self.halted = true;
        let Some(retirement) = self.retirement.take() else {
            return Ok(());
        };
        let retired = if self.abandoned {
            retirement.wait(self.timeout.max(CLOSE_GRACE))
        } else {
            retirement.wait_forever()
        };
        match retired {
            Retired::Closed(result) => result,
            Retired::Pending => {
                debug!(
                    timeout = ?self.timeout,
                    "worker still busy; endpoint close deferred to worker"
                );
                Ok(())
            }
            Retired::Lost => Err(StreamError::WorkerExited.into()),
        }
    }
}

impl<P, T> Drop for Timed<P, T> {
    fn drop(&mut self) {
        // worker 退出时自行关闭端点。
        self.handoff.close();
    }
}

enum WriteRequest {
    Write(Bytes),
    Flush,
}

/// 为每次写入（与刷新）施加时限的写装饰器。
///
/// ```
/// use spark_stream::{Close, NopClose, TimedWriter};
/// use std::{io::Write, time::Duration};
///
/// let mut writer = TimedWriter::new(NopClose::new(Vec::new()), Duration::from_secs(1));
/// assert_eq!(writer.write(b"example").unwrap(), 7);
/// writer.close().unwrap();
/// assert!(writer.write(b"late").is_err());
/// ```
pub struct TimedWriter {
    inner: Timed<WriteRequest, usize>,
}

impl TimedWriter {
    /// 包装 `endpoint`，每次写入最多等待 `timeout`。
    ///
    /// # Panics
    /// `timeout` 为零或无法启动 worker 线程时 panic：零时限永远不可能成功，属于配置错误。
    pub fn new<W>(endpoint: W, timeout: Duration) -> Self
    where
        W: WriteClose + Send + 'static,
    {
        match Self::try_new(endpoint, timeout) {
            Ok(writer) => writer,
            Err(err) => panic!("TimedWriter::new: {err}"),
        }
    }

    /// 同 [`TimedWriter::new`]，但以错误代替 panic。
    pub fn try_new<W>(endpoint: W, timeout: Duration) -> Result<Self, StreamError>
    where
        W: WriteClose + Send + 'static,
    {
        Self::with_config(endpoint, TimeoutConfig::new(timeout))
    }

    /// 按 [`TimeoutConfig`] 构造；时限为零时返回 [`StreamError::InvalidConfig`]。
    pub fn with_config<W>(endpoint: W, config: TimeoutConfig) -> Result<Self, StreamError>
    where
        W: WriteClose + Send + 'static,
    {
        let inner = Timed::start(
            "spark-stream-timed-write",
            endpoint,
            config,
            |endpoint: &mut W, request: WriteRequest| match request {
                WriteRequest::Write(data) => endpoint.write(&data),
                WriteRequest::Flush => endpoint.flush().map(|()| 0),
            },
        )?;
        Ok(Self { inner })
    }

    /// 单次调用的时限。
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }
}

impl Write for TimedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.call(
            Operation::Write,
            WriteRequest::Write(Bytes::copy_from_slice(buf)),
        )
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .call(Operation::Flush, WriteRequest::Flush)
            .map(|_| ())
    }
}

impl Close for TimedWriter {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

impl fmt::Debug for TimedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedWriter")
            .field("timeout", &self.inner.timeout)
            .field("halted", &self.inner.halted)
            .finish()
    }
}

/// 为每次读取施加时限的读装饰器。
///
/// worker 把数据读入自有的缓冲块，按时返回后再复制进调用方缓冲区；
/// 超时后到达的数据随缓冲块一起丢弃。
pub struct TimedReader {
    inner: Timed<usize, Bytes>,
}

impl TimedReader {
    /// 包装 `endpoint`，每次读取最多等待 `timeout`。
    ///
    /// # Panics
    /// `timeout` 为零或无法启动 worker 线程时 panic。
    pub fn new<R>(endpoint: R, timeout: Duration) -> Self
    where
        R: ReadClose + Send + 'static,
    {
        match Self::try_new(endpoint, timeout) {
            Ok(reader) => reader,
            Err(err) => panic!("TimedReader::new: {err}"),
        }
    }

    /// 同 [`TimedReader::new`]，但以错误代替 panic。
    pub fn try_new<R>(endpoint: R, timeout: Duration) -> Result<Self, StreamError>
    where
        R: ReadClose + Send + 'static,
    {
        Self::with_config(endpoint, TimeoutConfig::new(timeout))
    }

    /// 按 [`TimeoutConfig`] 构造；时限为零时返回 [`StreamError::InvalidConfig`]。
    pub fn with_config<R>(endpoint: R, config: TimeoutConfig) -> Result<Self, StreamError>
    where
        R: ReadClose + Send + 'static,
    {
        let inner = Timed::start(
            "spark-stream-timed-read",
            endpoint,
            config,
            |endpoint: &mut R, len: usize| {
                let mut chunk = BytesMut::zeroed(len);
                let n = endpoint.read(&mut chunk)?;
                chunk.truncate(n);
                Ok(chunk.freeze())
            },
        )?;
        Ok(Self { inner })
    }

    /// 单次调用的时限。
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }
}

impl Read for TimedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.inner.call(Operation::Read, buf.len())?;
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }
}

impl Close for TimedReader {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

impl fmt::Debug for TimedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedReader")
            .field("timeout", &self.inner.timeout)
            .field("halted", &self.inner.halted)
            .finish()
    }
}
