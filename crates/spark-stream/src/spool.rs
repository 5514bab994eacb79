//! 缓冲写入器：写入先进入内部缓冲，由后台 worker 周期性或按需刷新到底层端点。
//!
//! # 教案级导览
//!
//! - **Why**：频繁的小写入直接落到慢端点代价高昂；缓冲可以合并写入，但缓冲中的数据
//!   不能无限期滞留，因此需要一个不依赖调用方的周期刷新。
//! - **How**：
//!   - 内部缓冲层为 `std::io::BufWriter`，容量超出时的自动刷新完全继承自它；
//!   - 单个 worker 复用两路事件：交接通道上的写入 Job 与刷新截止时间。到期的刷新总是先于
//!     下一个 Job 处理，持续写入不会饿死计时器；
//!   - 缓冲由 `parking_lot::Mutex` 保护，显式 `flush` 与 worker 共用同一把锁，
//!     因此写入与刷新对底层端点而言是全序的。
//! - **What**：
//!   - 容量与周期都必须大于 0，否则构造返回 [`StreamError::InvalidConfig`]；
//!   - `write` 等待 worker 接受并完成写入后返回（没有超时）；
//!   - 关闭后写入或刷新返回 [`StreamError::UsedAfterClose`]；
//!   - `close`：关闭交接通道 → 等待 worker 退出 → 标记关闭 → 最终刷新 → 关闭端点；
//!     两者都失败时端点关闭错误优先，它意味着端点本身已经丢失。
//! - **Trade-offs**：后台刷新失败没有调用方可以接收，只能记录 `warn` 日志；
//!   失败的数据留在缓冲中，等待下一次刷新重试。

use std::{
    fmt,
    io::{self, BufWriter, Write},
    sync::{
        Arc,
        mpsc::{Receiver, RecvTimeoutError},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    config::SpoolConfig,
    endpoint::{Close, WriteClose},
    error::{Operation, StreamError},
    job::{self, Handoff, Job},
};

type Spool<W> = Arc<Mutex<BufWriter<W>>>;
type SpoolJob = Job<Bytes, io::Result<usize>>;

/// 周期刷新的缓冲写入器。
///
/// ```
/// use spark_stream::{Close, NopClose, SpoolConfig, SpooledWriter};
/// use std::{io::Write, time::Duration};
///
/// let config = SpoolConfig::default().with_flush_period(Duration::from_millis(50));
/// let mut writer = SpooledWriter::with_config(NopClose::new(Vec::new()), config).unwrap();
/// writer.write_all(b"spooled").unwrap();
/// writer.flush().unwrap();
/// writer.close().unwrap();
/// ```
pub struct SpooledWriter<W>
where
    W: WriteClose + Send + 'static,
{
    handoff: Handoff<Bytes, io::Result<usize>>,
    worker: Option<JoinHandle<()>>,
    spool: Option<Spool<W>>,
    config: SpoolConfig,
    halted: bool,
}

impl<W> SpooledWriter<W>
where
    W: WriteClose + Send + 'static,
{
    /// 使用默认配置（4096 字节、15 秒）包装端点。
    pub fn new(endpoint: W) -> Result<Self, StreamError> {
        Self::with_config(endpoint, SpoolConfig::default())
    }

    /// 按 `config` 包装端点并启动刷新 worker；配置非法时返回错误。
    pub fn with_config(endpoint: W, config: SpoolConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let spool: Spool<W> = Arc::new(Mutex::new(BufWriter::with_capacity(
            config.buffer_size(),
            endpoint,
        )));
        let (handoff, inbox) = Handoff::new();
        let worker = job::spawn("spark-stream-spool", {
            let spool = Arc::clone(&spool);
            let period = config.flush_period();
            move || run_spool(&spool, inbox, period)
        })?;
        Ok(Self {
            handoff,
            worker: Some(worker),
            spool: Some(spool),
            config,
            halted: false,
        })
    }

    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    /// 当前滞留在缓冲中、尚未到达端点的字节数。
    pub fn buffered(&self) -> usize {
        self.spool
            .as_ref()
            .map_or(0, |spool| spool.lock().buffer().len())
    }

    fn live_spool(&self, operation: Operation) -> Result<&Spool<W>, StreamError> {
        match &self.spool {
            Some(spool) if !self.halted => Ok(spool),
            _ => Err(StreamError::used_after_close(operation)),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.handoff.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("spool worker panicked before retiring");
            }
        }
        self.halted = true;

        let spool = self.spool.take().ok_or(StreamError::WorkerExited)?;
        // worker 已退出，这里是缓冲的唯一持有者。
        let mut buffered = Arc::into_inner(spool)
            .ok_or(StreamError::WorkerExited)?
            .into_inner();
        let flushed = buffered.flush();
        let (mut endpoint, unflushed) = buffered.into_parts();
        if let Ok(rest) = unflushed {
            if !rest.is_empty() {
                debug!(bytes = rest.len(), "discarding spooled bytes that failed the final flush");
            }
        }
        endpoint.close().and(flushed)
    }
}

fn run_spool<W: Write>(spool: &Mutex<BufWriter<W>>, inbox: Receiver<SpoolJob>, period: Duration) {
    debug!(?period, "spool worker started");
    let mut next_flush = Instant::now() + period;
    loop {
        let now = Instant::now();
        if now >= next_flush {
            if let Err(err) = spool.lock().flush() {
                warn!(error = %err, "periodic spool flush failed");
            }
            next_flush = now + period;
        }
        match inbox.recv_timeout(next_flush.saturating_duration_since(Instant::now())) {
            Ok(job) => {
                let outcome = spool
                    .lock()
                    .write_all(&job.payload)
                    .map(|()| job.payload.len());
                job.complete(outcome);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("spool worker retired");
}

impl<W> Write for SpooledWriter<W>
where
    W: WriteClose + Send + 'static,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.live_spool(Operation::Write)?;
        // `&mut self` 保证至多一个在途写入，槽位被占用只可能源于 worker 已退出。
        let outcome = self
            .handoff
            .submit(Bytes::copy_from_slice(buf))
            .map_err(|_| StreamError::WorkerExited)?;
        outcome.recv().map_err(|_| StreamError::WorkerExited)?
    }

    fn flush(&mut self) -> io::Result<()> {
        self.live_spool(Operation::Flush)?.lock().flush()
    }
}

impl<W> Close for SpooledWriter<W>
where
    W: WriteClose + Send + 'static,
{
    fn close(&mut self) -> io::Result<()> {
        if self.halted {
            return Err(StreamError::used_after_close(Operation::Close).into());
        }
        self.shutdown()
    }
}

impl<W> Drop for SpooledWriter<W>
where
    W: WriteClose + Send + 'static,
{
    fn drop(&mut self) {
        if !self.halted {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "spooled writer close on drop failed");
            }
        }
    }
}

impl<W> fmt::Debug for SpooledWriter<W>
where
    W: WriteClose + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpooledWriter")
            .field("config", &self.config)
            .field("halted", &self.halted)
            .finish()
    }
}
