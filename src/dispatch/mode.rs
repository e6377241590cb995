/// How an emission reaches one connected slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
  /// Invoke the slot synchronously on the emitting thread.
  Direct,

  /// Post the slot invocation to the receiver's executor and return
  /// immediately. The payload is cloned into the posted closure so it
  /// outlives the emission.
  Queued,

  /// Post to the receiver's executor and suspend the emitter until the
  /// slot has run.
  ///
  /// Aiming this at the emitting thread itself would deadlock and is
  /// rejected as [`DeadlockRisk`](crate::DispatchError::DeadlockRisk).
  BlockingQueued,

  /// [`Direct`](DeliveryMode::Direct) when emitter and receiver share a
  /// thread (or the receiver is detached from any executor),
  /// [`Queued`](DeliveryMode::Queued) otherwise. Resolved per emission.
  #[default]
  Auto,
}
