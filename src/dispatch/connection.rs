//! Connection management: registration, wildcard disconnect, chaining.

use std::sync::Arc;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  dispatch::{
    mode::DeliveryMode,
    registry::{registry_lock, SlotTag},
    signal::{insert_row, DetachedRows, SignalEndpoint, SignalRef},
    slot::SlotEndpoint,
  },
  error::{DispatchError, DispatchResult},
};

/// Connect `slot` on `receiver`, identified by `tag`, to `signal`.
///
/// The slot callable runs under `mode` whenever `signal` emits; it
/// receives the payload by reference (queued modes hand it a clone owned
/// by the delivery). Returns `false` when the `(receiver, tag)` pair is
/// already connected to this signal; the existing row is left untouched.
pub fn connect<A, F>(
  signal: &SignalEndpoint<A>,
  receiver: &SlotEndpoint,
  tag: SlotTag,
  mode: DeliveryMode,
  slot: F,
) -> bool
where
  A: Clone + Send + 'static,
  F: Fn(&A) + Send + Sync + 'static,
{
  let slot_fn: Arc<dyn Fn(&A) + Send + Sync> = Arc::new(slot);
  let inserted;
  {
    let _registry = registry_lock();
    inserted = insert_row(signal.shared(), receiver.shared(), tag, mode, slot_fn.clone());
  }
  drop(slot_fn);
  inserted
}

/// Remove every row matching `signal`, `receiver` and `tag`, where `None`
/// is a wildcard. At least one of `signal` and `receiver` must be given.
/// Unknown rows are silently skipped; returns the number of rows removed.
pub fn disconnect(
  signal: Option<&SignalRef>,
  receiver: Option<&SlotEndpoint>,
  tag: Option<SlotTag>,
) -> DispatchResult<usize> {
  let mut holders: Vec<DetachedRows> = Vec::new();
  let mut removed = 0;
  {
    let _registry = registry_lock();
    match (signal, receiver) {
      (None, None) => return Err(DispatchError::InvalidArgument),
      (Some(signal), receiver) => {
        let detached = signal.peer.detach_rows(receiver.map(|r| r.id()), tag);
        for (weak_slot, row_tag) in &detached.links {
          if let Some(slot) = weak_slot.upgrade() {
            slot.inverse_remove(*row_tag, signal.peer.peer_id());
          }
        }
        removed = detached.links.len();
        holders.push(detached);
      }
      (None, Some(receiver)) => {
        for (row_tag, weak_peer) in receiver.shared().inverse_peers(tag) {
          let Some(peer) = weak_peer.upgrade() else {
            continue;
          };
          let detached = peer.detach_rows(Some(receiver.id()), Some(row_tag));
          removed += detached.links.len();
          receiver.shared().inverse_remove(row_tag, peer.peer_id());
          holders.push(detached);
        }
      }
    }
  }
  // Detached closures die outside the registry lock.
  drop(holders);
  Ok(removed)
}

/// Chain `downstream` after `upstream`: every payload emitted by
/// `upstream` is re-emitted by `downstream`, with `mode` governing the hop
/// onto the downstream relay endpoint. Chaining the same pair twice is a
/// no-op; returns `false` in that case.
pub fn chain<A>(
  upstream: &SignalEndpoint<A>,
  downstream: &SignalEndpoint<A>,
  mode: DeliveryMode,
) -> bool
where
  A: Clone + Send + 'static,
{
  let weak = Arc::downgrade(downstream.shared());
  let tag = SlotTag::chain_of(downstream.id());
  let slot_fn: Arc<dyn Fn(&A) + Send + Sync> = Arc::new(move |args: &A| {
    if let Some(signal) = weak.upgrade() {
      if let Err(e) = signal.emit_now(args) {
        error!("chained re-emission failed: {e}");
      }
    }
  });
  let inserted;
  {
    let _registry = registry_lock();
    inserted = insert_row(
      upstream.shared(),
      downstream.relay_endpoint().shared(),
      tag,
      mode,
      slot_fn.clone(),
    );
  }
  drop(slot_fn);
  inserted
}
