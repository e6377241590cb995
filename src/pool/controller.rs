//! Pool control loop and lifecycle.

use std::{
  collections::{BTreeSet, VecDeque},
  sync::{Arc, Mutex, Weak},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dispatch::{connect, disconnect, DeliveryMode, SignalEndpoint, SlotEndpoint, SlotTag},
  error::PoolResult,
  executor::Executor,
  pool::{
    processor::{PoolHandle, Processor},
    worker::{InstanceId, Worker, WorkerHarness},
  },
};

// Slot identities of the pool protocol.
const SET_COUNT_SLOT: SlotTag = SlotTag::new(0x706f_6f6c, 1);
const EXTEND_SLOT: SlotTag = SlotTag::new(0x706f_6f6c, 2);
const CLEAR_SLOT: SlotTag = SlotTag::new(0x706f_6f6c, 3);
const READY_SLOT: SlotTag = SlotTag::new(0x706f_6f6c, 4);
const RESULT_SLOT: SlotTag = SlotTag::new(0x706f_6f6c, 5);
const TASK_SLOT: SlotTag = SlotTag::new(0x706f_6f6c, 6);

// One live worker slot. Field order is drop order: the executor joins
// first, so an in-flight fulfill finishes and emits before the
// connections unwind.
struct WorkerRecord<T: Clone + Send + 'static> {
  executor: Executor,
  instance_id: InstanceId,
  task_out: SignalEndpoint<T>,
  // Owns the worker's receiver context; dropping it unwinds the task row.
  #[allow(dead_code)]
  slot: SlotEndpoint,
}

pub(crate) struct WorkerController<T, R>
where
  T: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  workers: Vec<WorkerRecord<T>>,
  tasks: VecDeque<T>,
  ready: BTreeSet<usize>,
  destructing: bool,
  prototype: Box<dyn Worker<Task = T, Output = R>>,
  processor: Arc<Mutex<Box<dyn Processor<Task = T, Output = R>>>>,
  processor_slot: SlotEndpoint,
  control_slot: SlotEndpoint,
  handle: PoolHandle<T>,
  self_ref: Weak<Mutex<WorkerController<T, R>>>,
}

impl<T, R> WorkerController<T, R>
where
  T: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  fn set_thread_count(&mut self, count: usize) {
    let current = self.workers.len();
    if count < current {
      info!("pool shrinking from {current} to {count} workers");
      for record in self.workers.drain(count..) {
        record.executor.stop();
      }
      self.ready.retain(|index| *index < count);
    } else if count > current {
      if self.destructing {
        debug!("pool growth ignored during teardown");
        return;
      }
      info!("pool growing from {current} to {count} workers");
      for index in current..count {
        match self.spawn_worker(index) {
          Ok(record) => {
            self.workers.push(record);
            self.ready.insert(index);
          }
          Err(e) => {
            error!("could not start worker {index}: {e}");
            break;
          }
        }
      }
      self.assign_tasks();
    }
  }

  fn spawn_worker(&self, index: usize) -> PoolResult<WorkerRecord<T>> {
    let instance_id = InstanceId::fresh();
    let executor = Executor::spawn(&format!("pool-worker-{index}"))?;
    let slot = SlotEndpoint::new(executor.handle());

    let result_out = SignalEndpoint::new();
    {
      let processor = Arc::clone(&self.processor);
      let pool = self.handle.clone();
      connect(
        &result_out,
        &self.processor_slot,
        RESULT_SLOT,
        DeliveryMode::Queued,
        move |result: &R| {
          processor.lock().unwrap().on_result(result.clone(), &pool);
        },
      );
    }

    let ready_out = SignalEndpoint::new();
    {
      let controller = self.self_ref.clone();
      connect(
        &ready_out,
        &self.control_slot,
        READY_SLOT,
        DeliveryMode::Queued,
        move |notification: &(usize, InstanceId)| {
          let (index, instance_id) = *notification;
          if let Some(controller) = controller.upgrade() {
            controller
              .lock()
              .unwrap()
              .worker_finished(index, instance_id);
          }
        },
      );
    }

    let task_out = SignalEndpoint::new();
    let harness = Arc::new(Mutex::new(WorkerHarness {
      worker: self.prototype.clone_prototype(),
      result_out,
      ready_out,
      index,
      instance_id,
    }));
    connect(
      &task_out,
      &slot,
      TASK_SLOT,
      DeliveryMode::Queued,
      move |task: &T| {
        harness.lock().unwrap().receive_task(task.clone());
      },
    );

    Ok(WorkerRecord {
      executor,
      instance_id,
      task_out,
      slot,
    })
  }

  fn extend_queue(&mut self, new_tasks: Vec<T>) {
    if self.destructing {
      debug!("extend_queue ignored during teardown");
      return;
    }
    self.tasks.extend(new_tasks);
    self.assign_tasks();
  }

  fn clear_queue(&mut self) {
    if self.destructing {
      return;
    }
    let dropped = self.tasks.len();
    self.tasks.clear();
    if dropped > 0 {
      debug!("cleared {dropped} pending tasks");
    }
  }

  fn assign_tasks(&mut self) {
    while !self.tasks.is_empty() {
      let Some(index) = self.ready.pop_first() else {
        break;
      };
      let Some(task) = self.tasks.pop_front() else {
        self.ready.insert(index);
        break;
      };
      trace!("assigning task to worker {index}");
      self.workers[index].task_out.emit(task);
    }
  }

  fn worker_finished(&mut self, index: usize, instance_id: InstanceId) {
    let live = self
      .workers
      .get(index)
      .is_some_and(|record| record.instance_id == instance_id);
    if !live {
      debug!("discarding ready notification from retired worker {index}");
      return;
    }
    self.ready.insert(index);
    self.assign_tasks();
  }

  fn begin_teardown(&mut self) {
    self.destructing = true;
    // No result may reach user code past this point.
    match disconnect(None, Some(&self.processor_slot), None) {
      Ok(removed) => debug!("teardown detached {removed} result connections"),
      Err(e) => error!("teardown disconnect failed: {e}"),
    }
  }
}

/// Top-level owner of a pool: the control-loop executor, the processor
/// executor and the wiring between them.
///
/// Construction returns once the pool is fully wired. Dropping the
/// controller stops the workers first and the processor after, in an
/// order that cannot deadlock against in-flight blocking calls; results
/// already queued to the processor are still delivered while it drains.
pub struct Controller<T, R>
where
  T: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  control_executor: Option<Executor>,
  processor_executor: Option<Executor>,
  state: Arc<Mutex<WorkerController<T, R>>>,
  handle: PoolHandle<T>,
}

impl<T, R> Controller<T, R>
where
  T: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  /// Build a pool around `processor` and `prototype` with `thread_count`
  /// workers. Ownership of both transfers to the controller.
  pub fn new(
    processor: Box<dyn Processor<Task = T, Output = R>>,
    prototype: Box<dyn Worker<Task = T, Output = R>>,
    thread_count: usize,
  ) -> PoolResult<Controller<T, R>> {
    let control_executor = Executor::spawn("pool-control")?;
    let processor_executor = Executor::spawn("pool-processor")?;

    let handle = PoolHandle::new();
    let state = Arc::new(Mutex::new(WorkerController {
      workers: Vec::new(),
      tasks: VecDeque::new(),
      ready: BTreeSet::new(),
      destructing: false,
      prototype,
      processor: Arc::new(Mutex::new(processor)),
      processor_slot: SlotEndpoint::new(processor_executor.handle()),
      control_slot: SlotEndpoint::new(control_executor.handle()),
      handle: handle.clone(),
      self_ref: Weak::new(),
    }));
    state.lock().unwrap().self_ref = Arc::downgrade(&state);

    {
      let guard = state.lock().unwrap();
      let signals = handle.signals();
      {
        let controller = Arc::downgrade(&state);
        connect(
          &signals.set_count,
          &guard.control_slot,
          SET_COUNT_SLOT,
          DeliveryMode::BlockingQueued,
          move |count: &usize| {
            if let Some(state) = controller.upgrade() {
              state.lock().unwrap().set_thread_count(*count);
            }
          },
        );
      }
      {
        let controller = Arc::downgrade(&state);
        connect(
          &signals.extend,
          &guard.control_slot,
          EXTEND_SLOT,
          DeliveryMode::BlockingQueued,
          move |tasks: &Vec<T>| {
            if let Some(state) = controller.upgrade() {
              state.lock().unwrap().extend_queue(tasks.clone());
            }
          },
        );
      }
      {
        let controller = Arc::downgrade(&state);
        connect(
          &signals.clear,
          &guard.control_slot,
          CLEAR_SLOT,
          DeliveryMode::BlockingQueued,
          move |_: &()| {
            if let Some(state) = controller.upgrade() {
              state.lock().unwrap().clear_queue();
            }
          },
        );
      }
    }

    let controller = Controller {
      control_executor: Some(control_executor),
      processor_executor: Some(processor_executor),
      state,
      handle,
    };
    // Blocking call: the constructor returns with the pool fully wired.
    controller.handle.set_thread_count(thread_count);
    Ok(controller)
  }

  /// A clonable handle for driving the pool from any thread.
  pub fn handle(&self) -> PoolHandle<T> {
    self.handle.clone()
  }
}

impl<T, R> Drop for Controller<T, R>
where
  T: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  fn drop(&mut self) {
    if let Some(executor) = &self.control_executor {
      let state = Arc::clone(&self.state);
      let _ = executor
        .handle()
        .submit(move || state.lock().unwrap().begin_teardown());
    }
    // FIFO on the control executor: the teardown closure runs before this
    // blocking stop, and both run after any in-flight blocking call.
    self.handle.set_thread_count(0);
    if let Some(executor) = self.processor_executor.take() {
      executor.stop();
    }
    if let Some(executor) = self.control_executor.take() {
      executor.stop();
    }
  }
}
