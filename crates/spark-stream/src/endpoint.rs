//! 端点契约：在 `std::io::Read` / `std::io::Write` 之上补充显式关闭能力。
//!
//! # 设计背景（Why）
//! - 标准库把“关闭”交给 `Drop`，但 `Drop` 无法报告错误；装饰器需要把底层关闭错误交还给调用方，
//!   因此单独定义 [`Close`]；
//! - [`ReadClose`]/[`WriteClose`] 只是组合别名，通过 blanket 实现自动覆盖所有满足条件的类型，
//!   便于以 `Box<dyn WriteClose + Send>` 的形式做类型擦除。
//!
//! # 契约说明（What）
//! - `close` 每个端点至多调用一次；装饰器自身会保证这一点，端点实现无需防御重复关闭；
//! - [`NopClose`] 为不需要关闭的读写器提供空实现，常用于包装 `Vec<u8>`、`io::Sink` 或测试替身。

use std::io::{self, Read, Write};

/// 可显式关闭并报告错误的端点。
pub trait Close {
    fn close(&mut self) -> io::Result<()>;
}

impl<T: Close + ?Sized> Close for Box<T> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// 可读且可关闭的端点。
pub trait ReadClose: Read + Close {}

impl<T: Read + Close + ?Sized> ReadClose for T {}

/// 可写且可关闭的端点。
pub trait WriteClose: Write + Close {}

impl<T: Write + Close + ?Sized> WriteClose for T {}

/// 为任意读写器补上空操作的 `close`。
///
/// ```
/// use spark_stream::{Close, NopClose};
/// use std::io::Write;
///
/// let mut endpoint = NopClose::new(Vec::new());
/// endpoint.write_all(b"example").unwrap();
/// endpoint.close().unwrap();
/// assert_eq!(endpoint.into_inner(), b"example");
/// ```
#[derive(Clone, Debug, Default)]
pub struct NopClose<T>(T);

impl<T> NopClose<T> {
    pub const fn new(inner: T) -> Self {
        Self(inner)
    }

    pub fn get_ref(&self) -> &T {
        &self.0
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Close for NopClose<T> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Read> Read for NopClose<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<T: Write> Write for NopClose<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
