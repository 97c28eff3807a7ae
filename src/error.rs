use thiserror::Error;

/// An error raised by the caching subsystem.
///
/// This error is intended to be swallowed: apart from
/// [`touch`](crate::CacheProvider::touch), every cache operation catches it,
/// logs it, and degrades to a cache miss or a no-op. It derives `Clone` and
/// `PartialEq` so it can be captured in shared futures and asserted on in
/// tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// An input failed validation, like an empty key-space name or a
    /// non-positive duration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying cache storage misbehaved.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A data provider failed to load the value to be cached.
    #[error("failed to load data: {0}")]
    Load(String),
}

/// An error raised by the [`BoundedTaskExecutor`](crate::BoundedTaskExecutor).
///
/// Unlike [`CacheError`], these are surfaced to the caller: the executor is a
/// direct coordination utility and must not hide failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// A new batch was submitted while a previous batch is still running.
    #[error("a previous task batch is still running")]
    Busy,

    /// An operation that needs a batch was invoked before any batch was
    /// submitted, or after the state was cleared.
    #[error("no task batch has been submitted")]
    NoBatch,

    /// The same task key occurred more than once in a batch.
    #[error("duplicate task in batch: {0}")]
    DuplicateTask(String),

    /// An input failed validation, like an empty batch or a zero resource
    /// limit.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested task is not part of the current batch.
    #[error("task was never submitted: {0}")]
    UnknownTask(String),

    /// The task was stopped before its body ran.
    #[error("task was cancelled before execution")]
    Cancelled,

    /// The current execution has been stopped, no new task can start.
    #[error("execution has been stopped")]
    Stopped,

    /// The task body failed, or its completion channel was dropped.
    #[error("task failed: {0}")]
    TaskFailed(String),
}
