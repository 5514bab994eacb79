//! 扇出写入器：把一次写入复制到一组动态的端点，并隔离失败的成员。
//!
//! # 教案级导览
//!
//! - **Why**：广播类场景（日志分发、订阅推送）中，
//!   一个坏掉的目的端不能阻塞或拖垮对其它目的端的写入。
//!   这里采用“尽力广播”策略：写入永远报告完整长度，失败只通过成员集合的变化体现。
//! - **How**：
//!   - 成员集合以 [`SinkId`]（共享分配的地址）为键，重复加入同一个 [`Sink`] 是空操作；
//!   - 集合每次变化都重建一个有序快照，写入遍历快照而非正在变化的集合；
//!   - 并行模式为快照中每个成员派生一个作用域线程，等待全部完成；串行模式逐个写入；
//!   - 端点报错，或写入字节数少于请求值（升级为 [`StreamError::ShortWrite`]），都视为失败：
//!     该成员被移出集合并关闭，关闭错误被丢弃（成员已经报告过失败）。
//! - **What**：
//!   - [`FanOutCore`]：非加锁核心，要求外部同步（`&mut self`）；
//!   - [`FanOutWriter`]：在核心外包一层读写锁，写入与查询持共享锁，增删与关闭持独占锁；
//!   - 二者语义一致，并共同实现 [`MultiWriter`]。
//! - **Trade-offs**：
//!   - 并行扇出只能缓解、不能解决慢成员拖慢整批的问题：没有单成员超时，最慢的成员决定整批耗时；
//!     可以把慢成员包在 [`TimedWriter`](crate::TimedWriter) 中来约束它；
//!   - 加锁版本在共享锁下扇出，之后再取独占锁驱逐失败成员；并发写入可能观测到同一个失败成员，
//!     只有仍在集合中的成员会被关闭，因此每个成员至多被关闭一次；
//!   - 两把锁之间成员可能被移除后重新加入。每次加入都会推进成员纪元，扇出时记下纪元，
//!     驱逐只作用于在该纪元之前加入的成员，重新加入的同一端点不会因旧失败被关闭。

use std::{
    collections::HashMap,
    fmt,
    io::{self, Write},
    sync::Arc,
    thread,
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    endpoint::{Close, WriteClose},
    error::{CloseErrors, StreamError},
};

/// 扇出成员的身份标识，由 [`Sink`] 的共享分配地址导出。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(usize);

/// 扇出成员句柄。
///
/// 克隆得到的句柄指向同一个端点、拥有同一个 [`SinkId`]，可以用来在之后移除该成员。
/// 端点由内部互斥锁保护，同一个 `Sink` 同时加入多个扇出写入器也是安全的。
#[derive(Clone)]
pub struct Sink {
    endpoint: Arc<Mutex<Box<dyn WriteClose + Send>>>,
}

impl Sink {
    /// 把端点包装成可加入扇出写入器的成员。
    pub fn new<W>(endpoint: W) -> Self
    where
        W: WriteClose + Send + 'static,
    {
        Self {
            endpoint: Arc::new(Mutex::new(Box::new(endpoint))),
        }
    }

    /// 成员身份；克隆得到的句柄返回相同的值。
    pub fn id(&self) -> SinkId {
        SinkId(Arc::as_ptr(&self.endpoint) as usize)
    }

    /// 写入整段数据；短写即失败。
    fn deliver(&self, data: &[u8]) -> io::Result<()> {
        let written = self.endpoint.lock().write(data)?;
        if written != data.len() {
            return Err(StreamError::ShortWrite {
                written,
                requested: data.len(),
            }
            .into());
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.endpoint.lock().flush()
    }

    fn close(&self) -> io::Result<()> {
        self.endpoint.lock().close()
    }
}

impl PartialEq for Sink {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Sink {}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sink").field(&self.id()).finish()
    }
}

type Failure = (Sink, io::Error);

/// 扇出时观测到的失败，连同观测时的成员纪元。
struct Failures {
    epoch: u64,
    failed: Vec<Failure>,
}

fn deliver_series(snapshot: &[Sink], data: &[u8]) -> Vec<Failure> {
    snapshot
        .iter()
        .filter_map(|sink| sink.deliver(data).err().map(|err| (sink.clone(), err)))
        .collect()
}

fn deliver_parallel(snapshot: &[Sink], data: &[u8]) -> Vec<Failure> {
    if snapshot.len() < 2 {
        return deliver_series(snapshot, data);
    }
    thread::scope(|scope| {
        let pending: Vec<_> = snapshot
            .iter()
            .map(|sink| {
                let spawned = thread::Builder::new()
                    .name("spark-stream-fanout".to_owned())
                    .spawn_scoped(scope, move || sink.deliver(data));
                (sink, spawned)
            })
            .collect();
        pending
            .into_iter()
            .filter_map(|(sink, spawned)| {
                let outcome = match spawned {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| Err(io::Error::other("fan-out member panicked"))),
                    // 无法派生线程时退化为就地写入。
                    Err(_) => sink.deliver(data),
                };
                outcome.err().map(|err| (sink.clone(), err))
            })
            .collect()
    })
}

fn flush_series(snapshot: &[Sink]) -> Vec<Failure> {
    snapshot
        .iter()
        .filter_map(|sink| sink.flush().err().map(|err| (sink.clone(), err)))
        .collect()
}

fn close_evicted(evicted: Vec<Failure>) {
    for (sink, cause) in evicted {
        warn!(sink = ?sink.id(), error = %cause, "evicting failed fan-out member");
        if let Err(err) = sink.close() {
            debug!(sink = ?sink.id(), error = %err, "ignoring close error of evicted member");
        }
    }
}

/// 两种扇出写入器的共同接口。
pub trait MultiWriter {
    /// 加入成员；已存在时为空操作。
    fn add(&mut self, sink: Sink);

    /// 移除成员，返回该成员此前是否存在。被移除的成员不会被关闭。
    fn remove(&mut self, sink: &Sink) -> bool;

    fn contains(&self, sink: &Sink) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 并行写入所有成员，驱逐失败者，始终返回 `data.len()`。
    fn broadcast(&mut self, data: &[u8]) -> usize;

    /// 逐个写入所有成员，驱逐失败者，始终返回 `data.len()`。
    fn broadcast_series(&mut self, data: &[u8]) -> usize;

    /// 关闭并清空全部成员，聚合每一个关闭错误。
    fn close_all(&mut self) -> Result<(), CloseErrors>;
}

struct Member {
    sink: Sink,
    /// 加入时的成员纪元。
    joined: u64,
}

/// 非加锁的扇出核心，调用方负责同步。
#[derive(Default)]
pub struct FanOutCore {
    members: HashMap<SinkId, Member>,
    snapshot: Vec<Sink>,
    /// 每次加入成员递增。
    epoch: u64,
}

impl FanOutCore {
    /// 创建没有成员的核心。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组初始成员创建核心，重复的成员只保留一个。
    pub fn with_sinks<I>(sinks: I) -> Self
    where
        I: IntoIterator<Item = Sink>,
    {
        let mut core = Self::new();
        for sink in sinks {
            core.admit(sink);
        }
        core.rebuild();
        core
    }

    /// 当前成员快照。
    pub fn snapshot(&self) -> &[Sink] {
        &self.snapshot
    }

    /// 加入成员但不重建快照，返回是否为新成员。
    fn admit(&mut self, sink: Sink) -> bool {
        let id = sink.id();
        if self.members.contains_key(&id) {
            return false;
        }
        self.epoch += 1;
        let joined = self.epoch;
        self.members.insert(id, Member { sink, joined });
        true
    }

    fn rebuild(&mut self) {
        self.snapshot = self
            .members
            .values()
            .map(|member| member.sink.clone())
            .collect();
    }

    /// 以当前快照扇出，记下观测纪元。
    fn observe(&self, deliver: impl FnOnce(&[Sink]) -> Vec<Failure>) -> Failures {
        Failures {
            epoch: self.epoch,
            failed: deliver(&self.snapshot),
        }
    }

    /// 把失败成员移出集合，返回其中确实仍是成员、且早于观测纪元加入的那部分。
    fn detach(&mut self, failures: Failures) -> Vec<Failure> {
        let Failures { epoch, failed } = failures;
        let evicted: Vec<Failure> = failed
            .into_iter()
            .filter(|(sink, _)| {
                let id = sink.id();
                let stale = self
                    .members
                    .get(&id)
                    .is_some_and(|member| member.joined <= epoch);
                stale && self.members.remove(&id).is_some()
            })
            .collect();
        if !evicted.is_empty() {
            self.rebuild();
        }
        evicted
    }

    fn evict(&mut self, failures: Failures) {
        if !failures.failed.is_empty() {
            close_evicted(self.detach(failures));
        }
    }
}

impl MultiWriter for FanOutCore {
    fn add(&mut self, sink: Sink) {
        if self.admit(sink) {
            self.rebuild();
        }
    }

    fn remove(&mut self, sink: &Sink) -> bool {
        let removed = self.members.remove(&sink.id()).is_some();
        if removed {
            self.rebuild();
        }
        removed
    }

    fn contains(&self, sink: &Sink) -> bool {
        self.members.contains_key(&sink.id())
    }

    fn len(&self) -> usize {
        self.snapshot.len()
    }

    fn broadcast(&mut self, data: &[u8]) -> usize {
        let failures = self.observe(|snapshot| deliver_parallel(snapshot, data));
        self.evict(failures);
        data.len()
    }

    fn broadcast_series(&mut self, data: &[u8]) -> usize {
        let failures = self.observe(|snapshot| deliver_series(snapshot, data));
        self.evict(failures);
        data.len()
    }

    fn close_all(&mut self) -> Result<(), CloseErrors> {
        let mut errors = CloseErrors::new();
        for sink in self.snapshot.drain(..) {
            errors.push(sink.close());
        }
        self.members.clear();
        errors.into_result()
    }
}

impl Write for FanOutCore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.broadcast(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        let failures = self.observe(flush_series);
        self.evict(failures);
        Ok(())
    }
}

impl Close for FanOutCore {
    fn close(&mut self) -> io::Result<()> {
        self.close_all()
            .map_err(|errors| StreamError::from(errors).into())
    }
}

impl fmt::Debug for FanOutCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutCore")
            .field("members", &self.snapshot)
            .finish()
    }
}

/// 线程安全的扇出写入器。
///
/// ```
/// use spark_stream::{FanOutWriter, NopClose, Sink};
///
/// let writer = FanOutWriter::new();
/// assert!(writer.is_empty());
/// writer.add(Sink::new(NopClose::new(Vec::new())));
/// assert_eq!(writer.broadcast(b"blob"), 4);
/// assert_eq!(writer.len(), 1);
/// ```
#[derive(Default)]
pub struct FanOutWriter {
    core: RwLock<FanOutCore>,
}

impl FanOutWriter {
    /// 创建没有成员的写入器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组初始成员创建写入器。
    pub fn with_sinks<I>(sinks: I) -> Self
    where
        I: IntoIterator<Item = Sink>,
    {
        Self {
            core: RwLock::new(FanOutCore::with_sinks(sinks)),
        }
    }

    pub fn add(&self, sink: Sink) {
        self.core.write().add(sink);
    }

    pub fn remove(&self, sink: &Sink) -> bool {
        self.core.write().remove(sink)
    }

    pub fn contains(&self, sink: &Sink) -> bool {
        self.core.read().contains(sink)
    }

    pub fn len(&self) -> usize {
        self.core.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.read().is_empty()
    }

    pub fn broadcast(&self, data: &[u8]) -> usize {
        let failures = self
            .core
            .read()
            .observe(|snapshot| deliver_parallel(snapshot, data));
        self.evict(failures);
        data.len()
    }

    pub fn broadcast_series(&self, data: &[u8]) -> usize {
        let failures = self
            .core
            .read()
            .observe(|snapshot| deliver_series(snapshot, data));
        self.evict(failures);
        data.len()
    }

    pub fn close_all(&self) -> Result<(), CloseErrors> {
        self.core.write().close_all()
    }

    pub fn into_inner(self) -> FanOutCore {
        self.core.into_inner()
    }

    fn evict(&self, failures: Failures) {
        if failures.failed.is_empty() {
            return;
        }
        let evicted = self.core.write().detach(failures);
        close_evicted(evicted);
    }

    fn flush_members(&self) {
        let failures = self.core.read().observe(flush_series);
        self.evict(failures);
    }
}

impl MultiWriter for FanOutWriter {
    fn add(&mut self, sink: Sink) {
        FanOutWriter::add(self, sink);
    }

    fn remove(&mut self, sink: &Sink) -> bool {
        FanOutWriter::remove(self, sink)
    }

    fn contains(&self, sink: &Sink) -> bool {
        FanOutWriter::contains(self, sink)
    }

    fn len(&self) -> usize {
        FanOutWriter::len(self)
    }

    fn broadcast(&mut self, data: &[u8]) -> usize {
        FanOutWriter::broadcast(self, data)
    }

    fn broadcast_series(&mut self, data: &[u8]) -> usize {
        FanOutWriter::broadcast_series(self, data)
    }

    fn close_all(&mut self) -> Result<(), CloseErrors> {
        FanOutWriter::close_all(self)
    }
}

impl Write for FanOutWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(FanOutWriter::broadcast(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_members();
        Ok(())
    }
}

impl Write for &FanOutWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(FanOutWriter::broadcast(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_members();
        Ok(())
    }
}

impl Close for FanOutWriter {
    fn close(&mut self) -> io::Result<()> {
        self.core
            .get_mut()
            .close_all()
            .map_err(|errors| StreamError::from(errors).into())
    }
}

impl fmt::Debug for FanOutWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutWriter")
            .field("members", &self.core.read().snapshot)
            .finish()
    }
}
