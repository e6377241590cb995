//! Receiver-side endpoint: executor binding, inverse connection table and
//! sender tracking.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, Weak},
  thread::{self, ThreadId},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dispatch::{
    registry::{registry_lock, EndpointId, SlotTag},
    signal::SignalPeer,
  },
  executor::ExecutorHandle,
};

pub(crate) struct SlotShared {
  id: EndpointId,
  executor: Mutex<Option<ExecutorHandle>>,
  // slot-tag -> emitters holding rows that target this endpoint
  inverse: Mutex<HashMap<SlotTag, Vec<Weak<dyn SignalPeer>>>>,
  // executor-thread -> LIFO of emitters driving the currently-executing slot
  senders: Mutex<HashMap<ThreadId, Vec<EndpointId>>>,
}

impl SlotShared {
  fn new(executor: Option<ExecutorHandle>) -> Arc<SlotShared> {
    Arc::new(SlotShared {
      id: EndpointId::fresh(),
      executor: Mutex::new(executor),
      inverse: Mutex::new(HashMap::new()),
      senders: Mutex::new(HashMap::new()),
    })
  }

  pub(crate) fn id(&self) -> EndpointId {
    self.id
  }

  pub(crate) fn executor_handle(&self) -> Option<ExecutorHandle> {
    self.executor.lock().unwrap().clone()
  }

  // Caller holds the registry lock.
  pub(crate) fn inverse_insert(&self, tag: SlotTag, peer: Weak<dyn SignalPeer>) {
    self
      .inverse
      .lock()
      .unwrap()
      .entry(tag)
      .or_default()
      .push(peer);
  }

  // Caller holds the registry lock. Dead peers are pruned on the way.
  pub(crate) fn inverse_remove(&self, tag: SlotTag, signal: EndpointId) {
    let mut inverse = self.inverse.lock().unwrap();
    if let Some(peers) = inverse.get_mut(&tag) {
      peers.retain(|weak| weak.upgrade().is_some_and(|peer| peer.peer_id() != signal));
      if peers.is_empty() {
        inverse.remove(&tag);
      }
    }
  }

  // Caller holds the registry lock.
  pub(crate) fn inverse_peers(&self, tag: Option<SlotTag>) -> Vec<(SlotTag, Weak<dyn SignalPeer>)> {
    let inverse = self.inverse.lock().unwrap();
    inverse
      .iter()
      .filter(|(row_tag, _)| tag.map_or(true, |wanted| **row_tag == wanted))
      .flat_map(|(row_tag, peers)| peers.iter().map(move |peer| (*row_tag, peer.clone())))
      .collect()
  }

  fn take_inverse(&self) -> HashMap<SlotTag, Vec<Weak<dyn SignalPeer>>> {
    std::mem::take(&mut *self.inverse.lock().unwrap())
  }

  fn push_sender(&self, sender: EndpointId) {
    self
      .senders
      .lock()
      .unwrap()
      .entry(thread::current().id())
      .or_default()
      .push(sender);
  }

  fn pop_sender(&self) {
    let mut senders = self.senders.lock().unwrap();
    let thread = thread::current().id();
    if let Some(stack) = senders.get_mut(&thread) {
      stack.pop();
      if stack.is_empty() {
        senders.remove(&thread);
      }
    }
  }

  fn current_sender(&self) -> Option<EndpointId> {
    self
      .senders
      .lock()
      .unwrap()
      .get(&thread::current().id())
      .and_then(|stack| stack.last().copied())
  }
}

// Pushes the emitter for the duration of one slot invocation. Popping on
// drop keeps the stack balanced when the slot panics.
pub(crate) struct SenderScope<'a> {
  slot: &'a SlotShared,
}

impl<'a> SenderScope<'a> {
  pub(crate) fn enter(slot: &'a SlotShared, sender: EndpointId) -> SenderScope<'a> {
    slot.push_sender(sender);
    SenderScope { slot }
  }
}

impl Drop for SenderScope<'_> {
  fn drop(&mut self) {
    self.slot.pop_sender();
  }
}

/// Receiver context for slot callables.
///
/// A `SlotEndpoint` is bound to at most one executor at a time: queued and
/// blocking deliveries run there, direct deliveries on the emitting
/// thread. Dropping the endpoint removes every connection naming it before
/// the destructor returns.
pub struct SlotEndpoint {
  shared: Arc<SlotShared>,
}

impl SlotEndpoint {
  /// A receiver whose queued deliveries run on `executor`.
  pub fn new(executor: &ExecutorHandle) -> SlotEndpoint {
    SlotEndpoint {
      shared: SlotShared::new(Some(executor.clone())),
    }
  }

  /// A receiver with no executor. Only direct delivery (and auto, which
  /// degrades to direct here) can reach it.
  pub fn detached() -> SlotEndpoint {
    SlotEndpoint {
      shared: SlotShared::new(None),
    }
  }

  pub fn id(&self) -> EndpointId {
    self.shared.id
  }

  /// Move this receiver to another executor. Connections stay in place;
  /// sender stacks are keyed by thread, so deliveries already executing
  /// are unaffected.
  pub fn rebind(&self, executor: &ExecutorHandle) {
    *self.shared.executor.lock().unwrap() = Some(executor.clone());
  }

  /// The emitter whose emission is currently executing on the calling
  /// thread, if any. Meaningful only inside a slot callable.
  pub fn current_sender(&self) -> Option<EndpointId> {
    self.shared.current_sender()
  }

  pub(crate) fn shared(&self) -> &Arc<SlotShared> {
    &self.shared
  }
}

impl Drop for SlotEndpoint {
  fn drop(&mut self) {
    let mut holders = Vec::new();
    {
      let _registry = registry_lock();
      for (tag, peers) in self.shared.take_inverse() {
        for weak in peers {
          if let Some(peer) = weak.upgrade() {
            holders.push(peer.detach_rows(Some(self.shared.id), Some(tag)));
          }
        }
      }
    }
    // Detached closures may themselves own endpoints whose destructors
    // take the registry lock; they die here, outside of it.
    drop(holders);
  }
}

static_assertions::assert_impl_all!(SlotEndpoint: Send, Sync);
