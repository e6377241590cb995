//! Worker side of the pool: the user trait and the per-worker harness.

use crate::dispatch::SignalEndpoint;

/// Identity minted once per worker instance and never reused.
///
/// Ready notifications carry it so that notifications from workers retired
/// by a resize can be told apart from live ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
  pub(crate) fn fresh() -> InstanceId {
    InstanceId(rand::random())
  }
}

/// A unit of task execution, cloned from a user-supplied prototype.
///
/// `fulfill` runs on the worker's own executor thread, one task at a time.
/// `clone_prototype` must produce a fresh worker with equivalent user
/// state; the pool calls it once per worker slot when growing.
pub trait Worker: Send {
  type Task: Clone + Send + 'static;
  type Output: Clone + Send + 'static;

  fn fulfill(&mut self, task: Self::Task) -> Self::Output;

  fn clone_prototype(&self) -> Box<dyn Worker<Task = Self::Task, Output = Self::Output>>;
}

// Everything one worker needs to execute a task and report back: the user
// worker plus its outbound signals. Lives behind the task-slot closure on
// the worker's executor.
pub(crate) struct WorkerHarness<T, R>
where
  T: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  pub worker: Box<dyn Worker<Task = T, Output = R>>,
  pub result_out: SignalEndpoint<R>,
  pub ready_out: SignalEndpoint<(usize, InstanceId)>,
  pub index: usize,
  pub instance_id: InstanceId,
}

impl<T, R> WorkerHarness<T, R>
where
  T: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  // Runs on the worker executor: fulfill, then the result, then the ready
  // notification.
  pub(crate) fn receive_task(&mut self, task: T) {
    let result = self.worker.fulfill(task);
    self.result_out.emit(result);
    self.ready_out.emit((self.index, self.instance_id));
  }
}
