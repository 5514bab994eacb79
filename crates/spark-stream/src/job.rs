//! Job/Result 交接模式。
//!
//! # 教案级导览
//!
//! - **Why**：端点的读写调用是阻塞的，无法从外部取消。把“接受请求”与“执行阻塞调用”拆开，
//!   调用方就可以让结果与计时器赛跑，或者让后台 worker 串行化所有写入。
//! - **How**：每个装饰器实例持有一个容量为 1 的交接通道（`sync_channel(1)`），调用方以
//!   `try_send` 非阻塞投递 [`Job`]；每个 Job 自带一次性的私有结果通道，只有接受该 Job 的
//!   worker 会写入它，且恰好写入一次。交接通道关闭后 worker 处理完剩余 Job 再退出。
//! - **What**：
//!   - 同一实例同一时刻只允许一个在途调用；`io::Read`/`io::Write` 的 `&mut self` 接收者
//!     天然保证了这一点，需要多调用方共享时应在外部串行化
//!     （例如 [`LockingWriter`](crate::LockingWriter)）；
//!   - 槽位被占用时投递被丢弃并报告 [`Rejected::Occupied`]，调用方不会无限期阻塞；
//!   - 结果通道容量为 1，worker 发布结果永不阻塞；调用方放弃等待后结果直接被丢弃。

use std::{
    io,
    sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::{endpoint::Close, error::StreamError};

/// 一次在途请求：负载与调用方独占的结果通道。
pub(crate) struct Job<P, O> {
    pub(crate) payload: P,
    pub(crate) results: SyncSender<O>,
}

impl<P, O> Job<P, O> {
    /// 发布结果；调用方已放弃等待时结果被静默丢弃。
    pub(crate) fn complete(self, outcome: O) {
        let _ = self.results.send(outcome);
    }
}

/// 投递被拒绝的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Rejected {
    /// 槽位中仍有一个尚未被 worker 取走的 Job。
    Occupied,
    /// 交接通道已关闭或 worker 已退出。
    Retired,
}

/// 调用方一侧的交接通道。
pub(crate) struct Handoff<P, O> {
    jobs: Option<SyncSender<Job<P, O>>>,
}

impl<P, O> Handoff<P, O> {
    /// 创建容量为 1 的交接通道，返回调用方句柄与 worker 一侧的接收端。
    pub(crate) fn new() -> (Self, Receiver<Job<P, O>>) {
        let (jobs, inbox) = mpsc::sync_channel(1);
        (Self { jobs: Some(jobs) }, inbox)
    }

    /// 非阻塞投递一个 Job，成功时返回该 Job 的私有结果接收端。
    pub(crate) fn submit(&self, payload: P) -> Result<Receiver<O>, Rejected> {
        let jobs = self.jobs.as_ref().ok_or(Rejected::Retired)?;
        let (results, outcome) = mpsc::sync_channel(1);
        match jobs.try_send(Job { payload, results }) {
            Ok(()) => Ok(outcome),
            Err(TrySendError::Full(_)) => {
                trace!("handoff slot occupied; job dropped");
                Err(Rejected::Occupied)
            }
            Err(TrySendError::Disconnected(_)) => Err(Rejected::Retired),
        }
    }

    /// 关闭交接通道；worker 处理完已接受的 Job 后退出。返回通道此前是否处于打开状态。
    pub(crate) fn close(&mut self) -> bool {
        self.jobs.take().is_some()
    }
}

/// 以给定名称启动后台 worker 线程。
pub(crate) fn spawn<F>(name: &str, body: F) -> Result<JoinHandle<()>, StreamError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(body)
        .map_err(StreamError::Spawn)
}

/// worker 退出的观测结果。
#[derive(Debug)]
pub(crate) enum Retired {
    /// worker 已退出，并附带其关闭端点的结果。
    Closed(io::Result<()>),
    /// 在给定时限内 worker 仍未退出。
    Pending,
    /// worker 未报告关闭结果就退出了。
    Lost,
}

/// 独占端点的 worker 的退役信号。
pub(crate) struct Retirement {
    closed: Receiver<io::Result<()>>,
}

impl Retirement {
    /// 最多等待 `bound`，观察 worker 是否已经退出。
    pub(crate) fn wait(&self, bound: Duration) -> Retired {
        match self.closed.recv_timeout(bound) {
            Ok(result) => Retired::Closed(result),
            Err(RecvTimeoutError::Timeout) => Retired::Pending,
            Err(RecvTimeoutError::Disconnected) => Retired::Lost,
        }
    }

    /// 一直等到 worker 退出。
    pub(crate) fn wait_forever(&self) -> Retired {
        match self.closed.recv() {
            Ok(result) => Retired::Closed(result),
            Err(_) => Retired::Lost,
        }
    }
}

/// 启动一个独占 `endpoint` 的 worker：逐个执行 Job，通道关闭后关闭端点并报告结果。
///
/// 若调用方已不再等待关闭结果（例如关闭等待超时），关闭失败会以 `warn` 级别记录，
/// 这是该错误唯一的去处。
pub(crate) fn serve_until_closed<E, P, O, F>(
    name: &'static str,
    mut endpoint: E,
    inbox: Receiver<Job<P, O>>,
    mut serve: F,
) -> Result<Retirement, StreamError>
where
    E: Close + Send + 'static,
    P: Send + 'static,
    O: Send + 'static,
    F: FnMut(&mut E, P) -> O + Send + 'static,
{
    let (closed_tx, closed) = mpsc::sync_channel(1);
    spawn(name, move || {
        debug!(worker = name, "worker started");
        for Job { payload, results } in inbox {
            let _ = results.send(serve(&mut endpoint, payload));
        }
        let result = endpoint.close();
        if let Err(mpsc::SendError(Err(err))) = closed_tx.send(result) {
            warn!(worker = name, error = %err, "deferred endpoint close failed");
        }
        debug!(worker = name, "worker retired");
    })?;
    Ok(Retirement { closed })
}
