//! 装饰器的类型化构造参数。
//!
//! # 设计目的（Why）
//! - 所有配置都通过类型化选项传入，不读取文件或环境变量；
//! - 启用 `serde` 特性后，配置结构可以直接嵌入上层配置文件反序列化，
//!   但合法性校验始终发生在装饰器构造时，反序列化本身不会拒绝零值。
//!
//! # 契约说明（What）
//! - [`SpoolConfig`]：缓冲容量默认 4096 字节、刷新周期默认 15 秒，二者都必须大于 0；
//! - [`TimeoutConfig`]：单次调用时限，必须大于 0。

use std::time::Duration;

use crate::error::StreamError;

/// 缓冲写入器的默认缓冲容量。
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// 缓冲写入器的默认刷新周期。
pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(15);

/// [`SpooledWriter`](crate::SpooledWriter) 的构造参数。
///
/// ```
/// use spark_stream::SpoolConfig;
/// use std::time::Duration;
///
/// let config = SpoolConfig::default()
///     .with_buffer_size(64)
///     .with_flush_period(Duration::from_millis(10));
/// assert!(config.validate().is_ok());
/// assert!(SpoolConfig::default().with_buffer_size(0).validate().is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpoolConfig {
    buffer_size: usize,
    flush_period: Duration,
}

impl SpoolConfig {
    /// 以给定容量与刷新周期创建配置，不做校验。
    pub const fn new(buffer_size: usize, flush_period: Duration) -> Self {
        Self {
            buffer_size,
            flush_period,
        }
    }

    /// 替换缓冲容量（字节）。
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// 替换周期刷新的间隔。
    pub const fn with_flush_period(mut self, flush_period: Duration) -> Self {
        self.flush_period = flush_period;
        self
    }

    /// 缓冲容量（字节）。
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 周期刷新的间隔。
    pub const fn flush_period(&self) -> Duration {
        self.flush_period
    }

    /// 校验容量与周期均为正值。
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.buffer_size == 0 {
            return Err(StreamError::invalid_config(
                "buffer_size",
                "buffer size must be greater than 0",
            ));
        }
        if self.flush_period.is_zero() {
            return Err(StreamError::invalid_config(
                "flush_period",
                format!(
                    "flush period must be greater than 0: {:?}",
                    self.flush_period
                ),
            ));
        }
        Ok(())
    }
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_PERIOD)
    }
}

/// 超时装饰器的构造参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeoutConfig {
    timeout: Duration,
}

impl TimeoutConfig {
    /// 以单次调用时限创建配置，不做校验。
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 单次调用的时限。
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.timeout.is_zero() {
            return Err(StreamError::invalid_config(
                "timeout",
                format!("timeout must be greater than 0: {:?}", self.timeout),
            ));
        }
        Ok(())
    }
}

impl From<Duration> for TimeoutConfig {
    fn from(timeout: Duration) -> Self {
        Self::new(timeout)
    }
}
