//! 集成测试共享的端点替身。
//!
//! - [`MemoryEndpoint`]：可克隆的内存端点，克隆共享同一份内容与关闭计数，
//!   测试据此观察装饰器的副作用；
//! - [`ShortEndpoint`]：每次最多接受固定字节数，模拟短写；
//! - [`SlowEndpoint`] / [`SlowReader`]：在调用前休眠，模拟阻塞的慢端点；
//! - [`FailingEndpoint`]：读取、写入与关闭都失败；
//! - [`MemoryEndpoint::slow_refusing_close`]：关闭既慢又失败。
//!
//! 各测试文件只用到其中一部分。
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use spark_stream::Close;

#[derive(Clone, Default)]
pub struct MemoryEndpoint {
    data: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
    refuse_close: bool,
    close_delay: Duration,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入正常、但关闭总是失败的端点。
    pub fn refusing_close() -> Self {
        Self {
            refuse_close: true,
            ..Self::default()
        }
    }

    /// 关闭前先休眠 `delay`，随后关闭失败。
    pub fn slow_refusing_close(delay: Duration) -> Self {
        Self {
            refuse_close: true,
            close_delay: delay,
            ..Self::default()
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Write for MemoryEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for MemoryEndpoint {
    fn close(&mut self) -> io::Result<()> {
        if !self.close_delay.is_zero() {
            thread::sleep(self.close_delay);
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.refuse_close {
            return Err(io::Error::other("close refused"));
        }
        Ok(())
    }
}

pub struct ShortEndpoint {
    inner: MemoryEndpoint,
    max: usize,
}

impl ShortEndpoint {
    pub fn new(inner: MemoryEndpoint, max: usize) -> Self {
        Self { inner, max }
    }
}

impl Write for ShortEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.max);
        self.inner.write(&buf[..n])
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for ShortEndpoint {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

/// 每次调用前休眠；`delays` 用尽后使用 `steady`。
pub struct SlowEndpoint {
    inner: MemoryEndpoint,
    delays: VecDeque<Duration>,
    steady: Duration,
}

impl SlowEndpoint {
    pub fn new(inner: MemoryEndpoint, delay: Duration) -> Self {
        Self {
            inner,
            delays: VecDeque::new(),
            steady: delay,
        }
    }

    /// 只有第一次调用是慢的。
    pub fn slow_first_call(inner: MemoryEndpoint, delay: Duration) -> Self {
        Self {
            inner,
            delays: VecDeque::from([delay]),
            steady: Duration::ZERO,
        }
    }

    fn pause(&mut self) {
        let delay = self.delays.pop_front().unwrap_or(self.steady);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl Write for SlowEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pause();
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for SlowEndpoint {
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

pub struct SlowReader {
    data: io::Cursor<Vec<u8>>,
    delay: Duration,
    closes: Arc<AtomicUsize>,
}

impl SlowReader {
    pub fn new(data: &[u8], delay: Duration) -> Self {
        Self {
            data: io::Cursor::new(data.to_vec()),
            delay,
            closes: Arc::default(),
        }
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.data.read(buf)
    }
}

impl Close for SlowReader {
    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 读取、写入、刷新、关闭全部失败。
#[derive(Clone, Default)]
pub struct FailingEndpoint {
    closes: Arc<AtomicUsize>,
}

impl FailingEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Write for FailingEndpoint {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
    }
}

impl Read for FailingEndpoint {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
    }
}

impl Close for FailingEndpoint {
    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::other("close refused"))
    }
}

/// 轮询 `condition` 直到成立或超过 `limit`，返回最终结果。
pub fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
