//! Tapping a signal into a poll-able channel.
//!
//! A tap delivers payloads on the emitting thread into a bounded channel,
//! so embedding code can consume a signal without running an executor of
//! its own: synchronously with [`try_recv`](SignalChannelReceiver::try_recv),
//! from a `mio` poll (the receiver is `Evented`), or as an async stream.

use std::{
  io,
  pin::Pin,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  },
  task::{Context, Poll, Waker},
};

use futures::stream::{FusedStream, Stream};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio_06::Evented;
use mio_extras::channel as mio_channel;

use crate::dispatch::{
  connection::connect, mode::DeliveryMode, registry::SlotTag, signal::SignalEndpoint,
  slot::SlotEndpoint,
};

const TAP_MARK: u64 = u64::from_be_bytes(*b"sigtap\0\0");

impl<A: Clone + Send + 'static> SignalEndpoint<A> {
  /// Tap this signal into a bounded channel of `capacity` payloads.
  ///
  /// Payloads are pushed on the emitting thread; a full channel drops the
  /// payload rather than blocking the emitter (no-one is required to be
  /// listening to a tap). Dropping the receiver disconnects the tap.
  pub fn open_channel(&self, capacity: usize) -> SignalChannelReceiver<A> {
    let (sender, receiver) = mio_channel::sync_channel::<A>(capacity);
    let waker = Arc::new(Mutex::new(None));
    let endpoint = SlotEndpoint::detached();
    let tap = SignalChannelSender {
      sender: Mutex::new(sender),
      waker: Arc::clone(&waker),
    };
    connect(
      self,
      &endpoint,
      SlotTag::new(endpoint.id().raw(), TAP_MARK),
      DeliveryMode::Direct,
      move |args: &A| tap.push(args.clone()),
    );
    SignalChannelReceiver {
      actual_receiver: Mutex::new(receiver),
      waker,
      endpoint,
    }
  }
}

struct SignalChannelSender<A> {
  sender: Mutex<mio_channel::SyncSender<A>>,
  waker: Arc<Mutex<Option<Waker>>>,
}

impl<A: Send> SignalChannelSender<A> {
  fn push(&self, args: A) {
    // Waker lock first, before the send, mirroring the receive side.
    let mut waker = self.waker.lock().unwrap();
    match self.sender.lock().unwrap().try_send(args) {
      Ok(()) => {
        if let Some(w) = waker.take() {
          w.wake();
        }
      }
      Err(mio_channel::TrySendError::Full(_)) => {
        trace!("signal tap channel is full, payload dropped");
        // Kick the receiver anyway.
        if let Some(w) = waker.take() {
          w.wake();
        }
      }
      Err(mio_channel::TrySendError::Disconnected(_)) => {
        debug!("signal tap receiver is gone");
      }
      Err(mio_channel::TrySendError::Io(e)) => {
        debug!("signal tap channel send failed: {e}");
      }
    }
  }
}

/// Receiving half of a signal tap, created by
/// [`SignalEndpoint::open_channel`].
pub struct SignalChannelReceiver<A> {
  actual_receiver: Mutex<mio_channel::Receiver<A>>,
  waker: Arc<Mutex<Option<Waker>>>,
  endpoint: SlotEndpoint,
}

impl<A> SignalChannelReceiver<A> {
  pub fn try_recv(&self) -> Result<A, std::sync::mpsc::TryRecvError> {
    self.actual_receiver.lock().unwrap().try_recv()
  }

  /// The tap's receiving context; its id names the tap row in the
  /// emitter's connection table.
  pub fn endpoint(&self) -> &SlotEndpoint {
    &self.endpoint
  }

  pub fn as_async_stream(&self) -> SignalChannelStream<'_, A> {
    SignalChannelStream {
      receiver: self,
      terminated: AtomicBool::new(false),
    }
  }

  fn waker_update_lock(&self) -> std::sync::MutexGuard<'_, Option<Waker>> {
    self.waker.lock().unwrap()
  }
}

impl<A> Evented for SignalChannelReceiver<A> {
  // Delegate to the inner receiver, which is already Evented.
  fn register(
    &self,
    poll: &mio_06::Poll,
    token: mio_06::Token,
    interest: mio_06::Ready,
    opts: mio_06::PollOpt,
  ) -> io::Result<()> {
    self
      .actual_receiver
      .lock()
      .unwrap()
      .register(poll, token, interest, opts)
  }

  fn reregister(
    &self,
    poll: &mio_06::Poll,
    token: mio_06::Token,
    interest: mio_06::Ready,
    opts: mio_06::PollOpt,
  ) -> io::Result<()> {
    self
      .actual_receiver
      .lock()
      .unwrap()
      .reregister(poll, token, interest, opts)
  }

  fn deregister(&self, poll: &mio_06::Poll) -> io::Result<()> {
    self.actual_receiver.lock().unwrap().deregister(poll)
  }
}

/// Async view of a [`SignalChannelReceiver`]. Ends when the tap is
/// disconnected (emitter dropped or row removed).
pub struct SignalChannelStream<'a, A> {
  receiver: &'a SignalChannelReceiver<A>,
  terminated: AtomicBool,
}

impl<A> Stream for SignalChannelStream<'_, A> {
  type Item = A;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    // Waker lock first, before try_recv.
    let mut waker = self.receiver.waker_update_lock();
    match self.receiver.try_recv() {
      Ok(item) => Poll::Ready(Some(item)),
      Err(std::sync::mpsc::TryRecvError::Empty) => {
        *waker = Some(cx.waker().clone());
        Poll::Pending
      }
      Err(std::sync::mpsc::TryRecvError::Disconnected) => {
        self.terminated.store(true, Ordering::SeqCst);
        debug!("signal tap stream disconnected");
        Poll::Ready(None)
      }
    }
  }
}

impl<A> FusedStream for SignalChannelStream<'_, A> {
  fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::SeqCst)
  }
}
