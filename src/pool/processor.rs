//! Processor side of the pool: the user trait and the pool-mutation
//! handle.

use std::sync::Arc;

use crate::dispatch::SignalEndpoint;

/// Consumes completed results on its own executor thread.
///
/// `on_result` is called once per completed task, in completion order per
/// worker. Pool mutations requested through the handle suspend the caller
/// until the pool's control loop has applied them.
pub trait Processor: Send {
  type Task: Clone + Send + 'static;
  type Output: Clone + Send + 'static;

  fn on_result(&mut self, result: Self::Output, pool: &PoolHandle<Self::Task>);
}

/// Clonable handle carrying the pool-mutation signals.
///
/// Every operation is delivered blocking-queued to the pool's control
/// loop: the caller resumes once the mutation has been applied. Calling
/// from the control loop's own thread is rejected as a deadlock risk.
/// After the owning controller is gone the operations become no-ops.
pub struct PoolHandle<T: Clone + Send + 'static> {
  inner: Arc<PoolSignals<T>>,
}

pub(crate) struct PoolSignals<T: Clone + Send + 'static> {
  pub set_count: SignalEndpoint<usize>,
  pub extend: SignalEndpoint<Vec<T>>,
  pub clear: SignalEndpoint<()>,
}

impl<T: Clone + Send + 'static> PoolHandle<T> {
  pub(crate) fn new() -> PoolHandle<T> {
    PoolHandle {
      inner: Arc::new(PoolSignals {
        set_count: SignalEndpoint::new(),
        extend: SignalEndpoint::new(),
        clear: SignalEndpoint::new(),
      }),
    }
  }

  pub(crate) fn signals(&self) -> &PoolSignals<T> {
    &self.inner
  }

  /// Resize the pool to `count` workers.
  ///
  /// Shrinking joins the retired workers' executors: an in-flight task on
  /// them completes and its result is still delivered, while the late
  /// ready notification is discarded. Growing clones the prototype worker
  /// into each new slot.
  pub fn set_thread_count(&self, count: usize) {
    self.inner.set_count.emit(count);
  }

  /// Append tasks to the queue, preserving their order. Ignored while the
  /// pool is shutting down.
  pub fn extend_queue(&self, tasks: Vec<T>) {
    self.inner.extend.emit(tasks);
  }

  /// Drop every task not yet assigned to a worker. In-flight tasks are
  /// unaffected. Ignored while the pool is shutting down.
  pub fn clear_queue(&self) {
    self.inner.clear.emit(());
  }
}

impl<T: Clone + Send + 'static> Clone for PoolHandle<T> {
  fn clone(&self) -> Self {
    PoolHandle {
      inner: Arc::clone(&self.inner),
    }
  }
}

static_assertions::assert_impl_all!(PoolHandle<u32>: Send, Sync);
