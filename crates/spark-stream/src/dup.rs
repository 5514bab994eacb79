//! 引用计数的复制写入器：多个句柄共享一个端点，最后一个句柄关闭时端点恰好关闭一次。
//!
//! # 教案级导览
//!
//! - **Why**：多个生产者共用同一个输出端点，但端点的关闭时机取决于“所有人都写完了”，
//!   任何一个生产者都不知道自己是不是最后一个。
//! - **How**：组内共享一把互斥锁（保护端点）与一个原子计数器（未关闭的句柄数）。
//!   `dup` 自增；`close` 自减，把计数器降到零的那个句柄负责关闭端点。
//!   计数器只会经过一次零点，因此关闭恰好发生一次，与关闭顺序无关。
//! - **What**：
//!   - 写入持锁并循环写满整段数据；底层返回 0 字节时报告 `WriteZero`，不会死循环；
//!   - 同一句柄上重复关闭或关闭后写入返回 [`StreamError::UsedAfterClose`]；
//!   - 端点的关闭错误返回给触发关闭的那个句柄；
//!   - 未关闭就被丢弃的句柄等同于关闭，若它是最后一个，失败只能记录 `warn` 日志。
//! - **Trade-offs**：`dup` 可以从任何仍存活的句柄调用；从已关闭的句柄复制会使计数器从零
//!   “复活”，因此 `dup` 对已关闭句柄返回错误而不是新句柄。

use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

#[cfg(not(any(loom, spark_loom)))]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    endpoint::{Close, WriteClose},
    error::{Operation, StreamError},
};

struct DupGroup<W> {
    endpoint: Mutex<W>,
    outstanding: AtomicUsize,
}

/// 共享端点的一个句柄。
///
/// ```
/// use spark_stream::{Close, DupWriter, NopClose};
/// use std::io::Write;
///
/// let mut first = DupWriter::new(NopClose::new(Vec::new()));
/// let mut second = first.dup().unwrap();
/// first.write_all(b"one ").unwrap();
/// second.write_all(b"two").unwrap();
/// assert_eq!(first.outstanding(), 2);
/// first.close().unwrap();
/// second.close().unwrap();
/// ```
pub struct DupWriter<W>
where
    W: WriteClose,
{
    group: Arc<DupGroup<W>>,
    done: bool,
}

impl<W> DupWriter<W>
where
    W: WriteClose,
{
    /// 包装端点并返回第一个句柄。
    pub fn new(endpoint: W) -> Self {
        Self {
            group: Arc::new(DupGroup {
                endpoint: Mutex::new(endpoint),
                outstanding: AtomicUsize::new(1),
            }),
            done: false,
        }
    }

    /// 复制出一个新句柄；本句柄已关闭时返回 [`StreamError::UsedAfterClose`]。
    pub fn dup(&self) -> Result<Self, StreamError> {
        if self.done {
            return Err(StreamError::used_after_close(Operation::Dup));
        }
        // 调用方持有一个存活句柄，计数器此时至少为 1。
        self.group.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(Self {
            group: Arc::clone(&self.group),
            done: false,
        })
    }

    /// 组内尚未关闭的句柄数。
    pub fn outstanding(&self) -> usize {
        self.group.outstanding.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.done
    }

    /// 释放本句柄；若是最后一个，关闭端点并返回其结果。
    fn release(&mut self) -> io::Result<()> {
        self.done = true;
        if self.group.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(());
        }
        debug!("last duplicate handle released; closing endpoint");
        self.group.endpoint.lock().close()
    }
}

impl<W> Write for DupWriter<W>
where
    W: WriteClose,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.done {
            return Err(StreamError::used_after_close(Operation::Write).into());
        }
        let mut endpoint = self.group.endpoint.lock();
        let mut written = 0;
        while written < buf.len() {
            match endpoint.write(&buf[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "endpoint accepted zero bytes",
                    ));
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.done {
            return Err(StreamError::used_after_close(Operation::Flush).into());
        }
        self.group.endpoint.lock().flush()
    }
}

impl<W> Close for DupWriter<W>
where
    W: WriteClose,
{
    fn close(&mut self) -> io::Result<()> {
        if self.done {
            return Err(StreamError::used_after_close(Operation::Close).into());
        }
        self.release()
    }
}

impl<W> Drop for DupWriter<W>
where
    W: WriteClose,
{
    fn drop(&mut self) {
        if !self.done {
            if let Err(err) = self.release() {
                warn!(error = %err, "endpoint close from dropped duplicate handle failed");
            }
        }
    }
}

impl<W> fmt::Debug for DupWriter<W>
where
    W: WriteClose,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DupWriter")
            .field("outstanding", &self.outstanding())
            .field("done", &self.done)
            .finish()
    }
}
