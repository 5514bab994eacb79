//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义装饰器层自身产生的错误语义：配置错误、关闭后使用、超时、短写、关闭聚合错误；
//! - 调用方必须能够区分“超时”“失败”“已关闭”，三者分别对应重试、放弃与重建三种恢复动作。
//!
//! ## 设计要求（What）
//! - 装饰器实现 `std::io::Read`/`std::io::Write`，因此对外统一返回 [`io::Error`]；
//!   本模块错误被装箱进 `io::Error`，并映射到最贴近的 [`io::ErrorKind`]；
//! - [`StreamError::from_io`] 从 `io::Error` 中还原装饰器错误，底层端点错误则原样透传、不会被误判；
//! - 每个变体附带稳定错误码，便于日志检索与告警聚合。

use std::{fmt, io, time::Duration};

use thiserror::Error;

/// 触发错误的流操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Flush,
    Close,
    /// 从句柄复制出新句柄（[`DupWriter::dup`](crate::DupWriter::dup)）。
    Dup,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Flush => "flush",
            Operation::Close => "close",
            Operation::Dup => "duplicate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 针对错误给出的恢复建议。
///
/// - `Retry`：操作超出时限或资源暂时不可用，可以稍后重试；
/// - `Abandon`：操作本身失败，重试同一端点无意义；
/// - `Reconstruct`：装饰器已关闭或 worker 已退出，需要重新构建实例。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    Retry,
    Abandon,
    Reconstruct,
}

/// 装饰器层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把装饰器自身的失败与底层端点的 I/O 失败区分开，底层错误永远原样透传；
/// - **契约 (What)**：
///   - 所有变体均满足 `Send + Sync + 'static`，可以装箱进 [`io::Error`] 跨线程传播；
///   - `Timeout` 携带配置的超时时长，而非实际等待时长；
///   - `Close` 聚合扇出关闭时的全部失败，而不是只保留第一个；
/// - **执行逻辑 (How)**：`From<StreamError> for io::Error` 负责装箱与 `ErrorKind` 映射，
///   [`StreamError::from_io`] 负责还原。
/// - **设计权衡 (Trade-offs)**：`InvalidConfig` 使用 `String` 保存细节，
///   构造路径上的少量分配换取可读性。
#[derive(Debug, Error)]
pub enum StreamError {
    /// 构造参数非法，例如零超时、零缓冲容量或零刷新周期。
    #[error("invalid configuration `{field}`: {detail}")]
    InvalidConfig { field: &'static str, detail: String },

    /// 装饰器（或复制句柄）关闭之后仍被调用。
    #[error("cannot {operation}; already closed")]
    UsedAfterClose { operation: Operation },

    /// 单次调用超出配置的时限；底层调用可能仍在后台继续执行。
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// 端点报告写入的字节数少于请求值，即使端点自身没有返回错误。
    #[error("short write: {written} of {requested} bytes accepted")]
    ShortWrite { written: usize, requested: usize },

    /// 关闭多个端点时收集到的全部错误。
    #[error(transparent)]
    Close(#[from] CloseErrors),

    /// 后台 worker 在给出结果前退出，通常意味着端点调用发生了 panic。
    #[error("background worker exited before answering")]
    WorkerExited,

    /// 无法创建后台 worker 线程。
    #[error("failed to spawn background worker: {0}")]
    Spawn(#[source] io::Error),
}

impl StreamError {
    pub(crate) fn used_after_close(operation: Operation) -> Self {
        StreamError::UsedAfterClose { operation }
    }

    pub(crate) fn invalid_config(field: &'static str, detail: impl Into<String>) -> Self {
        StreamError::InvalidConfig {
            field,
            detail: detail.into(),
        }
    }

    /// 稳定错误码，格式为 `spark.stream.<kind>`。
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::InvalidConfig { .. } => "spark.stream.invalid_config",
            StreamError::UsedAfterClose { .. } => "spark.stream.used_after_close",
            StreamError::Timeout(_) => "spark.stream.timeout",
            StreamError::ShortWrite { .. } => "spark.stream.short_write",
            StreamError::Close(_) => "spark.stream.close_failed",
            StreamError::WorkerExited => "spark.stream.worker_exited",
            StreamError::Spawn(_) => "spark.stream.spawn_failed",
        }
    }

    /// 装箱进 `io::Error` 时使用的 `ErrorKind`。
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            StreamError::InvalidConfig { .. } => io::ErrorKind::InvalidInput,
            StreamError::UsedAfterClose { .. } => io::ErrorKind::NotConnected,
            StreamError::Timeout(_) => io::ErrorKind::TimedOut,
            StreamError::ShortWrite { .. } => io::ErrorKind::WriteZero,
            StreamError::Close(_) | StreamError::WorkerExited | StreamError::Spawn(_) => {
                io::ErrorKind::Other
            }
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            StreamError::Timeout(_) | StreamError::Spawn(_) => Recovery::Retry,
            StreamError::UsedAfterClose { .. } | StreamError::WorkerExited => {
                Recovery::Reconstruct
            }
            StreamError::InvalidConfig { .. }
            | StreamError::ShortWrite { .. }
            | StreamError::Close(_) => Recovery::Abandon,
        }
    }

    /// 从 `io::Error` 中取回装饰器错误；底层端点自身的错误返回 `None`。
    pub fn from_io(err: &io::Error) -> Option<&StreamError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<StreamError>())
    }

    /// 为任意 `io::Error` 给出恢复建议：装饰器错误按变体分类，底层错误一律视为 `Abandon`。
    pub fn recovery_of(err: &io::Error) -> Recovery {
        StreamError::from_io(err)
            .map(StreamError::recovery)
            .unwrap_or(Recovery::Abandon)
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// 多端点关闭时的错误列表。
///
/// # 教案式说明
/// - **意图 (Why)**：扇出写入器关闭所有成员时必须报告每一个失败，而不是被最后一个错误覆盖；
/// - **契约 (What)**：[`CloseErrors::push`] 忽略成功结果；[`CloseErrors::into_result`]
///   在列表为空时返回 `Ok(())`，否则返回包含全部错误的自身；
/// - **注意事项 (Trade-offs)**：错误按收集顺序保存，扇出成员的关闭顺序本身不作保证。
#[derive(Debug, Default)]
pub struct CloseErrors {
    errors: Vec<io::Error>,
}

impl CloseErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次关闭结果，成功结果被忽略。
    pub fn push(&mut self, result: io::Result<()>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, io::Error> {
        self.errors.iter()
    }

    pub fn into_inner(self) -> Vec<io::Error> {
        self.errors
    }

    /// 空列表归约为 `Ok(())`。
    pub fn into_result(self) -> Result<(), CloseErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CloseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no close errors"),
            [only] => write!(f, "1 close error: {only}"),
            many => {
                write!(f, "{} close errors: ", many.len())?;
                for (index, err) in many.iter().enumerate() {
                    if index > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CloseErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl IntoIterator for CloseErrors {
    type Item = io::Error;
    type IntoIter = std::vec::IntoIter<io::Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
