//! Typed cross-thread signal/slot dispatch paired with an elastically
//! sized worker pool.
//!
//! The crate has two halves that compose but are independently useful:
//!
//! - The **dispatch layer** routes typed payloads from
//!   [`SignalEndpoint`]s to slot callables registered on
//!   [`SlotEndpoint`]s, with per-connection [`DeliveryMode`]s: direct
//!   (synchronous on the emitting thread), queued (posted to the
//!   receiver's [`Executor`]), blocking-queued (posted, emitter suspends
//!   until the slot ran) and auto (direct when emitter and receiver share
//!   a thread, queued otherwise). Emitters know who they reach, receivers
//!   know who can reach them, and dropping either side atomically removes
//!   the cross-references. Inside a slot, [`SlotEndpoint::current_sender`]
//!   names the emitter that caused the call.
//!
//! - The **worker pool** consumes tasks of a user type through
//!   user-implemented [`Worker`]s, each on its own executor thread, and
//!   delivers results to a user-implemented [`Processor`] on another. The
//!   thread count can be changed while tasks are in flight; stale ready
//!   notifications from retired workers are recognized by
//!   [`InstanceId`] and discarded. All pool-internal traffic rides on the
//!   dispatch layer.
//!
//! Payload types only need `Clone + Send + 'static`; there is no
//! serialization and no type registry.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use signalpool::{Controller, PoolHandle, Processor, Worker};
//!
//! struct Double;
//!
//! impl Worker for Double {
//!   type Task = u32;
//!   type Output = u32;
//!
//!   fn fulfill(&mut self, task: u32) -> u32 {
//!     task * 2
//!   }
//!
//!   fn clone_prototype(&self) -> Box<dyn Worker<Task = u32, Output = u32>> {
//!     Box::new(Double)
//!   }
//! }
//!
//! struct Sum(Arc<Mutex<u32>>);
//!
//! impl Processor for Sum {
//!   type Task = u32;
//!   type Output = u32;
//!
//!   fn on_result(&mut self, result: u32, _pool: &PoolHandle<u32>) {
//!     *self.0.lock().unwrap() += result;
//!   }
//! }
//!
//! let total = Arc::new(Mutex::new(0));
//! let controller =
//!   Controller::new(Box::new(Sum(Arc::clone(&total))), Box::new(Double), 2).unwrap();
//! controller.handle().extend_queue(vec![1, 2, 3]);
//! # std::thread::sleep(std::time::Duration::from_millis(200));
//! drop(controller); // joins the workers, then drains the processor
//! assert_eq!(*total.lock().unwrap(), 12);
//! ```
//!
//! # Thread model
//!
//! Every receiver-side construct lives on an [`Executor`], a named thread
//! running a FIFO loop of closures. Slots on one executor run one at a
//! time; successive queued deliveries from the same emitter to the same
//! receiver execute in emission order. Parallelism is across executors.

pub mod dispatch;
pub mod executor;
pub mod pool;

mod error;

pub use dispatch::{
  chain, connect, disconnect, DeliveryMode, EndpointId, SignalChannelReceiver,
  SignalChannelStream, SignalEndpoint, SignalRef, SlotEndpoint, SlotTag,
};
pub use error::{DispatchError, DispatchResult, PoolError, PoolResult};
pub use executor::{Executor, ExecutorHandle};
pub use pool::{Controller, InstanceId, PoolHandle, Processor, Worker};
