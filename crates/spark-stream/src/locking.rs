//! 互斥写入器：每次写入、刷新与关闭都在同一把锁下完成，没有后台 worker。
//!
//! 作为其它装饰器的性能基线；需要在多个线程间共享一个 [`TimedWriter`](crate::TimedWriter)
//! 之类要求单一在途调用的写入器时，也可以把它包在这里。

use std::{
    fmt,
    io::{self, Write},
};

use parking_lot::Mutex;

use crate::endpoint::Close;

/// 以互斥锁串行化访问的写入器，可通过 `&LockingWriter` 在多线程间共享。
///
/// ```
/// use spark_stream::LockingWriter;
/// use std::{io::Write, thread};
///
/// let writer = LockingWriter::new(Vec::new());
/// thread::scope(|scope| {
///     for _ in 0..4 {
///         scope.spawn(|| (&writer).write_all(b"line\n").unwrap());
///     }
/// });
/// assert_eq!(writer.into_inner().len(), 20);
/// ```
#[derive(Default)]
pub struct LockingWriter<W> {
    inner: Mutex<W>,
}

impl<W> LockingWriter<W> {
    /// 包装写入器，之后的每次写入都在锁内完成。
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.inner.get_mut()
    }
}

impl<W: Write> Write for LockingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.get_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.get_mut().flush()
    }
}

impl<W: Write> Write for &LockingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // 整段写入在一次加锁内完成，并发调用方的数据不会交错。
        self.inner.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<W: Close> Close for LockingWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        self.inner.get_mut().close()
    }
}

impl<W: Close> Close for &LockingWriter<W> {
    fn close(&mut self) -> io::Result<()> {
        self.inner.lock().close()
    }
}

impl<W: fmt::Debug> fmt::Debug for LockingWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(inner) => f.debug_struct("LockingWriter").field("inner", &*inner).finish(),
            None => f.debug_struct("LockingWriter").field("inner", &"<locked>").finish(),
        }
    }
}
