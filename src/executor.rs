//! Single-threaded FIFO event loops.
//!
//! Every receiver-side construct in this crate lives on an [`Executor`]: a
//! named thread draining a channel of boxed closures through a `mio` poll.
//! Closures on one executor run one at a time, in submission order;
//! parallelism is across executors.

use std::{
  io,
  thread::{self, JoinHandle, ThreadId},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio_06::{Events, Poll, PollOpt, Ready, Token};
use mio_extras::channel as mio_channel;

use crate::error::{DispatchError, DispatchResult};

const COMMAND_CHANNEL_TOKEN: Token = Token(0);

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
  Run(Job),
  Quit,
}

/// A single-threaded FIFO event loop.
///
/// Closures submitted through the [`ExecutorHandle`] run on the executor's
/// thread in submission order. Stopping is in-band: everything submitted
/// before [`stop`](Executor::stop) still runs. A panicking closure kills
/// only this executor's thread; the panic is reported when the thread is
/// joined.
pub struct Executor {
  handle: ExecutorHandle,
  join_handle: Option<JoinHandle<()>>,
}

/// Clonable submission handle for an [`Executor`].
#[derive(Clone)]
pub struct ExecutorHandle {
  sender: mio_channel::Sender<Command>,
  thread_id: ThreadId,
}

impl Executor {
  /// Start a new executor thread with the given name.
  pub fn spawn(name: &str) -> io::Result<Executor> {
    let (sender, receiver) = mio_channel::channel::<Command>();
    let poll = Poll::new()?;
    poll.register(
      &receiver,
      COMMAND_CHANNEL_TOKEN,
      Ready::readable(),
      PollOpt::edge(),
    )?;
    let join_handle = thread::Builder::new()
      .name(name.to_string())
      .spawn(move || event_loop(&poll, &receiver))?;
    let thread_id = join_handle.thread().id();
    debug!("executor {name} started");
    Ok(Executor {
      handle: ExecutorHandle { sender, thread_id },
      join_handle: Some(join_handle),
    })
  }

  pub fn handle(&self) -> &ExecutorHandle {
    &self.handle
  }

  /// Stop the loop and join the thread. Closures already submitted run
  /// before the loop exits.
  pub fn stop(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    let Some(join_handle) = self.join_handle.take() else {
      return;
    };
    // A send failure means the loop is already gone; joining is still fine.
    let _ = self.handle.sender.send(Command::Quit);
    if thread::current().id() == self.handle.thread_id {
      // Cannot self-join; the quit command alone drains the loop.
      return;
    }
    if join_handle.join().is_err() {
      error!("executor thread panicked");
    }
  }
}

impl Drop for Executor {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl ExecutorHandle {
  /// Submit a closure to run on the executor thread.
  pub fn submit<F>(&self, job: F) -> DispatchResult<()>
  where
    F: FnOnce() + Send + 'static,
  {
    self
      .sender
      .send(Command::Run(Box::new(job)))
      .map_err(|_| DispatchError::ExecutorGone)
  }

  /// True when the calling thread is this executor's thread.
  pub fn is_current(&self) -> bool {
    thread::current().id() == self.thread_id
  }

  pub fn thread_id(&self) -> ThreadId {
    self.thread_id
  }
}

fn event_loop(poll: &Poll, receiver: &mio_channel::Receiver<Command>) {
  let mut events = Events::with_capacity(64);
  loop {
    if let Err(e) = poll.poll(&mut events, None) {
      error!("executor poll failed: {e}");
      return;
    }
    for event in events.iter() {
      if event.token() != COMMAND_CHANNEL_TOKEN {
        continue;
      }
      // Edge-triggered registration: drain until empty.
      loop {
        match receiver.try_recv() {
          Ok(Command::Run(job)) => job(),
          Ok(Command::Quit) => return,
          Err(std::sync::mpsc::TryRecvError::Empty) => break,
          Err(std::sync::mpsc::TryRecvError::Disconnected) => return,
        }
      }
    }
  }
}

static_assertions::assert_impl_all!(ExecutorHandle: Send);
