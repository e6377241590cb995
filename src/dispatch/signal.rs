//! Emitter-side endpoint: forward connection table and emission.

use std::{
  any::Any,
  sync::{mpsc, Arc, Mutex, Weak},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dispatch::{
    mode::DeliveryMode,
    registry::{registry_lock, EndpointId, SlotTag},
    slot::{SenderScope, SlotEndpoint, SlotShared},
  },
  error::{DispatchError, DispatchResult},
  executor::ExecutorHandle,
};

struct ConnectionRow<A> {
  receiver: Weak<SlotShared>,
  receiver_id: EndpointId,
  tag: SlotTag,
  mode: DeliveryMode,
  slot_fn: Arc<dyn Fn(&A) + Send + Sync>,
}

impl<A> Clone for ConnectionRow<A> {
  fn clone(&self) -> Self {
    ConnectionRow {
      receiver: self.receiver.clone(),
      receiver_id: self.receiver_id,
      tag: self.tag,
      mode: self.mode,
      slot_fn: self.slot_fn.clone(),
    }
  }
}

pub(crate) struct SignalShared<A> {
  id: EndpointId,
  rows: Mutex<Vec<ConnectionRow<A>>>,
}

/// Type-erased view of a signal's forward table, for inverse references
/// and wildcard disconnect.
pub(crate) trait SignalPeer: Send + Sync {
  fn peer_id(&self) -> EndpointId;

  /// Detach every row matching `receiver` and `tag` (`None` = wildcard).
  /// Caller holds the registry lock.
  fn detach_rows(&self, receiver: Option<EndpointId>, tag: Option<SlotTag>) -> DetachedRows;
}

/// Rows removed from a forward table. `links` drives the inverse-table
/// cleanup; `holder` keeps the detached slot closures alive so they drop
/// only after the registry lock is released.
pub(crate) struct DetachedRows {
  pub links: Vec<(Weak<SlotShared>, SlotTag)>,
  #[allow(dead_code)]
  pub holder: Box<dyn Any + Send>,
}

impl<A: 'static> SignalPeer for SignalShared<A> {
  fn peer_id(&self) -> EndpointId {
    self.id
  }

  fn detach_rows(&self, receiver: Option<EndpointId>, tag: Option<SlotTag>) -> DetachedRows {
    let mut rows = self.rows.lock().unwrap();
    let mut detached: Vec<ConnectionRow<A>> = Vec::new();
    rows.retain(|row| {
      let matches = receiver.map_or(true, |wanted| row.receiver_id == wanted)
        && tag.map_or(true, |wanted| row.tag == wanted);
      if matches {
        detached.push(row.clone());
      }
      !matches
    });
    let links = detached
      .iter()
      .map(|row| (row.receiver.clone(), row.tag))
      .collect();
    DetachedRows {
      links,
      holder: Box::new(detached),
    }
  }
}

impl<A: Clone + Send + 'static> SignalShared<A> {
  fn new() -> Arc<SignalShared<A>> {
    Arc::new(SignalShared {
      id: EndpointId::fresh(),
      rows: Mutex::new(Vec::new()),
    })
  }

  /// Emission proper. Traverses a snapshot of the rows, so a slot may
  /// connect, disconnect and re-emit freely; such mutations take effect
  /// after this emission returns.
  pub(crate) fn emit_now(&self, args: &A) -> DispatchResult<()> {
    let snapshot: Vec<ConnectionRow<A>> = self.rows.lock().unwrap().clone();
    for row in &snapshot {
      let Some(receiver) = row.receiver.upgrade() else {
        continue;
      };
      match resolve(row.mode, &receiver) {
        Resolved::Direct => {
          let _scope = SenderScope::enter(&receiver, self.id);
          (row.slot_fn)(args);
        }
        Resolved::Queued(executor) => {
          let slot_fn = row.slot_fn.clone();
          let weak = row.receiver.clone();
          let sender = self.id;
          let args = args.clone();
          let submitted = executor.submit(move || {
            // The receiver can go away between enqueue and execution.
            if let Some(receiver) = weak.upgrade() {
              let _scope = SenderScope::enter(&receiver, sender);
              slot_fn(&args);
            }
          });
          if submitted.is_err() {
            warn!("queued delivery skipped: receiver executor has quit");
          }
        }
        Resolved::Blocking(executor) => {
          if executor.is_current() {
            return Err(DispatchError::DeadlockRisk);
          }
          let (ack_tx, ack_rx) = mpsc::sync_channel::<()>(1);
          let slot_fn = row.slot_fn.clone();
          let weak = row.receiver.clone();
          let sender = self.id;
          let args = args.clone();
          let submitted = executor.submit(move || {
            if let Some(receiver) = weak.upgrade() {
              let _scope = SenderScope::enter(&receiver, sender);
              slot_fn(&args);
            }
            let _ = ack_tx.send(());
          });
          match submitted {
            Ok(()) => {
              // Wakes on the ack, or when the closure is dropped unrun.
              let _ = ack_rx.recv();
            }
            Err(_) => warn!("blocking delivery skipped: receiver executor has quit"),
          }
        }
        Resolved::Unreachable => return Err(DispatchError::NoExecutor),
      }
    }
    Ok(())
  }
}

// Caller holds the registry lock. Returns false (leaving the existing row
// untouched) when the (receiver, tag) pair is already connected.
pub(crate) fn insert_row<A: Clone + Send + 'static>(
  signal: &Arc<SignalShared<A>>,
  receiver: &Arc<SlotShared>,
  tag: SlotTag,
  mode: DeliveryMode,
  slot_fn: Arc<dyn Fn(&A) + Send + Sync>,
) -> bool {
  {
    let mut rows = signal.rows.lock().unwrap();
    if rows
      .iter()
      .any(|row| row.receiver_id == receiver.id() && row.tag == tag)
    {
      return false;
    }
    rows.push(ConnectionRow {
      receiver: Arc::downgrade(receiver),
      receiver_id: receiver.id(),
      tag,
      mode,
      slot_fn,
    });
  }
  let peer: Arc<dyn SignalPeer> = signal.clone();
  receiver.inverse_insert(tag, Arc::downgrade(&peer));
  true
}

enum Resolved {
  Direct,
  Queued(ExecutorHandle),
  Blocking(ExecutorHandle),
  Unreachable,
}

fn resolve(mode: DeliveryMode, receiver: &SlotShared) -> Resolved {
  let executor = receiver.executor_handle();
  match mode {
    DeliveryMode::Direct => Resolved::Direct,
    DeliveryMode::Auto => match executor {
      Some(handle) if !handle.is_current() => Resolved::Queued(handle),
      _ => Resolved::Direct,
    },
    DeliveryMode::Queued => match executor {
      Some(handle) => Resolved::Queued(handle),
      None => Resolved::Unreachable,
    },
    DeliveryMode::BlockingQueued => match executor {
      Some(handle) => Resolved::Blocking(handle),
      None => Resolved::Unreachable,
    },
  }
}

/// Typed emitter endpoint.
///
/// Emission delivers the payload to every connected slot according to each
/// row's [`DeliveryMode`]. Rows are traversed in connection order over a
/// snapshot: slots may connect, disconnect or re-emit during delivery, and
/// such mutations take effect after the current emission returns.
///
/// A `SignalEndpoint` can also stand downstream of another signal (see
/// [`chain`](crate::dispatch::chain)): its relay endpoint acts as the
/// receiving context and the payload is re-emitted on arrival.
pub struct SignalEndpoint<A: Clone + Send + 'static> {
  shared: Arc<SignalShared<A>>,
  relay: SlotEndpoint,
}

impl<A: Clone + Send + 'static> SignalEndpoint<A> {
  /// An emitter whose chain relay is detached: chained emissions re-emit
  /// on the upstream emitter's thread.
  pub fn new() -> SignalEndpoint<A> {
    SignalEndpoint {
      shared: SignalShared::new(),
      relay: SlotEndpoint::detached(),
    }
  }

  /// An emitter whose chain relay runs on `executor`: queued chains hop to
  /// that thread before re-emitting.
  pub fn with_executor(executor: &ExecutorHandle) -> SignalEndpoint<A> {
    SignalEndpoint {
      shared: SignalShared::new(),
      relay: SlotEndpoint::new(executor),
    }
  }

  pub fn id(&self) -> EndpointId {
    self.shared.id
  }

  /// Number of live connection rows on this emitter.
  pub fn connection_count(&self) -> usize {
    self.shared.rows.lock().unwrap().len()
  }

  /// Deliver the payload to every connected slot.
  ///
  /// # Panics
  ///
  /// On programming errors: blocking delivery aimed at the emitting
  /// thread, or queued delivery aimed at a detached receiver.
  pub fn emit(&self, args: A) {
    if let Err(e) = self.try_emit(&args) {
      panic!("signal emission failed: {e}");
    }
  }

  /// Fallible spelling of [`emit`](SignalEndpoint::emit).
  pub fn try_emit(&self, args: &A) -> DispatchResult<()> {
    self.shared.emit_now(args)
  }

  /// Type-erased reference to this emitter, for
  /// [`disconnect`](crate::dispatch::disconnect).
  pub fn signal_ref(&self) -> SignalRef {
    SignalRef {
      peer: self.shared.clone(),
    }
  }

  /// The receiving context this signal exposes when chained downstream of
  /// another signal.
  pub fn relay_endpoint(&self) -> &SlotEndpoint {
    &self.relay
  }

  pub(crate) fn shared(&self) -> &Arc<SignalShared<A>> {
    &self.shared
  }
}

impl<A: Clone + Send + 'static> Default for SignalEndpoint<A> {
  fn default() -> Self {
    Self::new()
  }
}

impl<A: Clone + Send + 'static> Drop for SignalEndpoint<A> {
  fn drop(&mut self) {
    let detached;
    {
      let _registry = registry_lock();
      detached = self.shared.detach_rows(None, None);
      for (weak_slot, tag) in &detached.links {
        if let Some(slot) = weak_slot.upgrade() {
          slot.inverse_remove(*tag, self.shared.id);
        }
      }
    }
    drop(detached);
  }
}

/// Type-erased reference to a signal, usable where the payload type is not
/// known.
pub struct SignalRef {
  pub(crate) peer: Arc<dyn SignalPeer>,
}

impl SignalRef {
  pub fn id(&self) -> EndpointId {
    self.peer.peer_id()
  }
}

static_assertions::assert_impl_all!(SignalEndpoint<String>: Send, Sync);

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use crate::{
    dispatch::{connect, disconnect, DeliveryMode, EndpointId, SignalEndpoint, SlotEndpoint, SlotTag},
    error::DispatchError,
    executor::Executor,
  };

  #[test]
  fn direct_connect_and_emit() {
    let signal = SignalEndpoint::<i32>::new();
    let receiver = SlotEndpoint::detached();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    assert!(connect(
      &signal,
      &receiver,
      SlotTag::fresh(),
      DeliveryMode::Direct,
      move |value: &i32| {
        sink.lock().unwrap().push(*value);
      }
    ));
    signal.emit(1);
    signal.emit(2);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
  }

  #[test]
  fn duplicate_connect_is_a_no_op() {
    let signal = SignalEndpoint::<i32>::new();
    let receiver = SlotEndpoint::detached();
    let tag = SlotTag::new(1, 2);
    let count = Arc::new(Mutex::new(0));
    for _ in 0..3 {
      let count = Arc::clone(&count);
      connect(&signal, &receiver, tag, DeliveryMode::Direct, move |_: &i32| {
        *count.lock().unwrap() += 1;
      });
    }
    assert_eq!(signal.connection_count(), 1);
    signal.emit(0);
    assert_eq!(*count.lock().unwrap(), 1);
  }

  #[test]
  fn connect_disconnect_parity() {
    let signal = SignalEndpoint::<i32>::new();
    let receiver = SlotEndpoint::detached();
    let tag = SlotTag::new(7, 7);
    for _ in 0..4 {
      connect(&signal, &receiver, tag, DeliveryMode::Direct, |_: &i32| {});
      assert_eq!(signal.connection_count(), 1);
      let removed = disconnect(Some(&signal.signal_ref()), Some(&receiver), Some(tag)).unwrap();
      assert_eq!(removed, 1);
      assert_eq!(signal.connection_count(), 0);
    }
    // unknown rows are skipped silently
    let removed = disconnect(Some(&signal.signal_ref()), Some(&receiver), Some(tag)).unwrap();
    assert_eq!(removed, 0);
  }

  #[test]
  fn no_delivery_after_disconnect() {
    let signal = SignalEndpoint::<i32>::new();
    let receiver = SlotEndpoint::detached();
    let tag = SlotTag::fresh();
    let hits = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&hits);
    connect(&signal, &receiver, tag, DeliveryMode::Direct, move |_: &i32| {
      *sink.lock().unwrap() += 1;
    });
    signal.emit(0);
    disconnect(Some(&signal.signal_ref()), Some(&receiver), Some(tag)).unwrap();
    signal.emit(0);
    assert_eq!(*hits.lock().unwrap(), 1);
  }

  #[test]
  fn disconnect_needs_a_side() {
    assert!(matches!(
      disconnect(None, None, Some(SlotTag::new(0, 0))),
      Err(DispatchError::InvalidArgument)
    ));
  }

  #[test]
  fn wildcard_disconnect_by_receiver() {
    let first = SignalEndpoint::<i32>::new();
    let second = SignalEndpoint::<i32>::new();
    let receiver = SlotEndpoint::detached();
    let hits = Arc::new(Mutex::new(0));
    for signal in [&first, &second] {
      let sink = Arc::clone(&hits);
      connect(signal, &receiver, SlotTag::fresh(), DeliveryMode::Direct, move |_: &i32| {
        *sink.lock().unwrap() += 1;
      });
    }
    let removed = disconnect(None, Some(&receiver), None).unwrap();
    assert_eq!(removed, 2);
    first.emit(0);
    second.emit(0);
    assert_eq!(*hits.lock().unwrap(), 0);
    assert_eq!(first.connection_count(), 0);
    assert_eq!(second.connection_count(), 0);
  }

  #[test]
  fn dropping_the_receiver_removes_rows() {
    let signal = SignalEndpoint::<i32>::new();
    {
      let receiver = SlotEndpoint::detached();
      connect(&signal, &receiver, SlotTag::fresh(), DeliveryMode::Direct, |_: &i32| {
        panic!("must not run after the receiver is gone");
      });
      assert_eq!(signal.connection_count(), 1);
    }
    assert_eq!(signal.connection_count(), 0);
    signal.emit(0);
  }

  #[test]
  fn dropping_the_signal_clears_inverse_references() {
    let receiver = SlotEndpoint::detached();
    {
      let signal = SignalEndpoint::<i32>::new();
      connect(&signal, &receiver, SlotTag::fresh(), DeliveryMode::Direct, |_: &i32| {});
    }
    // The receiver's own drop must find nothing stale to clean.
    drop(receiver);
  }

  #[test]
  fn auto_resolves_to_direct_on_the_receiver_thread() {
    let signal = SignalEndpoint::<i32>::new();
    let receiver = SlotEndpoint::detached();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    connect(&signal, &receiver, SlotTag::fresh(), DeliveryMode::Auto, move |value: &i32| {
      sink.lock().unwrap().push(*value);
    });
    signal.emit(9);
    // Direct resolution: delivered before emit returned.
    assert_eq!(*seen.lock().unwrap(), vec![9]);
  }

  #[test]
  fn queued_to_detached_receiver_is_rejected() {
    let signal = SignalEndpoint::<i32>::new();
    let receiver = SlotEndpoint::detached();
    connect(&signal, &receiver, SlotTag::fresh(), DeliveryMode::Queued, |_: &i32| {});
    assert!(matches!(
      signal.try_emit(&0),
      Err(DispatchError::NoExecutor)
    ));
  }

  #[test]
  fn blocking_to_own_executor_is_rejected() {
    let executor = Executor::spawn("blocking-self").unwrap();
    let receiver = SlotEndpoint::new(executor.handle());
    let signal = Arc::new(SignalEndpoint::<i32>::new());
    connect(&signal, &receiver, SlotTag::fresh(), DeliveryMode::BlockingQueued, |_: &i32| {});

    let (tx, rx) = std::sync::mpsc::channel();
    let emitter = Arc::clone(&signal);
    executor
      .handle()
      .submit(move || {
        tx.send(matches!(
          emitter.try_emit(&1),
          Err(DispatchError::DeadlockRisk)
        ))
        .unwrap();
      })
      .unwrap();
    assert!(rx.recv().unwrap());
  }

  #[test]
  fn nested_emission_tracks_senders() {
    let outer = SignalEndpoint::<()>::new();
    let inner = Arc::new(SignalEndpoint::<()>::new());
    let receiver = Arc::new(SlotEndpoint::detached());
    let observed: Arc<Mutex<Vec<Option<EndpointId>>>> = Arc::new(Mutex::new(Vec::new()));

    {
      let inner = Arc::clone(&inner);
      let receiver_in_slot = Arc::clone(&receiver);
      let observed = Arc::clone(&observed);
      connect(&outer, &receiver, SlotTag::new(1, 0), DeliveryMode::Direct, move |_: &()| {
        observed.lock().unwrap().push(receiver_in_slot.current_sender());
        inner.emit(());
        observed.lock().unwrap().push(receiver_in_slot.current_sender());
      });
    }
    {
      let receiver_for_inner = Arc::clone(&receiver);
      let observed = Arc::clone(&observed);
      connect(&inner, &receiver, SlotTag::new(2, 0), DeliveryMode::Direct, move |_: &()| {
        observed.lock().unwrap().push(receiver_for_inner.current_sender());
      });
    }

    outer.emit(());
    assert_eq!(
      *observed.lock().unwrap(),
      vec![Some(outer.id()), Some(inner.id()), Some(outer.id())]
    );
    assert_eq!(receiver.current_sender(), None);
  }
}
