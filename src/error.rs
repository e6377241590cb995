use thiserror::Error;

/// Failures surfaced by the dispatch layer.
///
/// Connection mutations themselves are total: duplicate connects and
/// unknown rows on disconnect are no-ops. The variants here are either
/// programming errors caught at the call site or teardown conditions.
#[derive(Debug, Error)]
pub enum DispatchError {
  /// `disconnect` needs at least one of signal and receiver.
  #[error("disconnect called with neither signal nor receiver")]
  InvalidArgument,

  /// Blocking delivery aimed at the thread doing the emitting.
  #[error("blocking delivery to the emitting thread would deadlock")]
  DeadlockRisk,

  /// Queued or blocking delivery aimed at a receiver with no executor.
  #[error("receiver is not bound to an executor")]
  NoExecutor,

  /// The receiving executor has quit and no longer accepts closures.
  #[error("executor is no longer running")]
  ExecutorGone,
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failures surfaced when building or resizing a pool.
#[derive(Debug, Error)]
pub enum PoolError {
  #[error("executor thread could not be started: {0}")]
  Spawn(#[from] std::io::Error),
}

pub type PoolResult<T> = Result<T, PoolError>;
