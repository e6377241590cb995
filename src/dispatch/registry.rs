//! Identity values and the process-wide connection registry lock.

use std::sync::{Mutex, MutexGuard};

/// Opaque identity of a dispatch endpoint, minted once per endpoint and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
  pub(crate) fn fresh() -> EndpointId {
    EndpointId(rand::random())
  }

  pub fn raw(&self) -> u64 {
    self.0
  }
}

/// Identity of one bound callable on a receiver.
///
/// Two pointer-sized opaques are enough to tell every slot a receiver
/// exposes apart: well-known slots use compile-time constants, ad-hoc
/// connections mint a fresh tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotTag(u64, u64);

impl SlotTag {
  pub const fn new(a: u64, b: u64) -> SlotTag {
    SlotTag(a, b)
  }

  pub fn fresh() -> SlotTag {
    SlotTag(rand::random(), rand::random())
  }

  // Tag of the relay row created when `signal` is chained downstream of
  // another signal. Derived, so chaining the same pair twice is a no-op.
  pub(crate) fn chain_of(signal: EndpointId) -> SlotTag {
    SlotTag(signal.raw(), CHAIN_MARK)
  }
}

const CHAIN_MARK: u64 = u64::from_be_bytes(*b"chainsig");

// Serializes every mutation that spans both sides of a connection:
// connect, disconnect, endpoint destruction. Acquired strictly before any
// endpoint-local mutex. Emission never takes this.
static REGISTRY_MUTEX: Mutex<()> = Mutex::new(());

pub(crate) fn registry_lock() -> MutexGuard<'static, ()> {
  REGISTRY_MUTEX.lock().unwrap()
}
