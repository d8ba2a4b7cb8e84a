//! Large-block path: requests at or above the mmap threshold bypass the
//! arena entirely and get their own private mapping, released back to the
//! OS immediately on free rather than recycled.

use crate::backend::OsBackend;
use crate::error::AllocError;
use crate::header::{BlockHeader, HEADER_SIZE, Link, header_to_payload};

/// Tracks only the aggregate counters the introspection surface needs;
/// individual mapped blocks carry their own size in their header and are
/// otherwise unmanaged by this struct.
pub(crate) struct LargePool {
  count: u64,
  bytes: u64,
}

impl LargePool {
  pub(crate) const fn new() -> Self {
    Self { count: 0, bytes: 0 }
  }

  /// Maps `HEADER_SIZE + need` bytes and returns the header of the new
  /// block. `need` is the raw requested size, stored verbatim — unlike
  /// heap blocks, mapped blocks carry no 8-byte alignment promise (I5
  /// scopes that to the arena only).
  pub(crate) fn allocate<B: OsBackend>(&mut self, backend: &mut B, need: usize) -> Result<Link, AllocError> {
    let total = HEADER_SIZE + need;
    let base = unsafe { backend.map_anonymous(total)? };
    let block = base as Link;
    unsafe { BlockHeader::init(block, need, false) };

    self.count += 1;
    self.bytes += need as u64;
    Ok(block)
  }

  /// Unmaps `block` and folds its size out of the running totals.
  pub(crate) fn free<B: OsBackend>(&mut self, backend: &mut B, block: Link) -> Result<(), AllocError> {
    let size = unsafe { (*block).size };
    unsafe { backend.unmap(block as *mut u8, HEADER_SIZE + size)? };

    self.count -= 1;
    self.bytes -= size as u64;
    Ok(())
  }

  pub(crate) fn count(&self) -> u64 {
    self.count
  }

  pub(crate) fn bytes(&self) -> u64 {
    self.bytes
  }
}

/// True once `header_to_payload`/`payload_to_header` round-tripping is the
/// only thing distinguishing a mapped block from a heap one: both store a
/// `BlockHeader`, but a mapped block's link fields are always null since it
/// never joins either arena index.
#[inline]
pub(crate) unsafe fn payload_of(block: Link) -> *mut u8 {
  unsafe { header_to_payload(block) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::FakeBackend;

  #[test]
  fn allocate_tracks_count_and_bytes() {
    let mut backend = FakeBackend::new(1);
    let mut pool = LargePool::new();

    let a = pool.allocate(&mut backend, 200_000).unwrap();
    assert_eq!(pool.count(), 1);
    assert_eq!(pool.bytes(), 200_000);
    assert_eq!(unsafe { (*a).size }, 200_000);
    assert!(!unsafe { (*a).free });
  }

  #[test]
  fn free_releases_mapping_and_untracks() {
    let mut backend = FakeBackend::new(1);
    let mut pool = LargePool::new();

    let a = pool.allocate(&mut backend, 200_000).unwrap();
    pool.free(&mut backend, a).unwrap();

    assert_eq!(pool.count(), 0);
    assert_eq!(pool.bytes(), 0);
  }

  #[test]
  fn allocate_does_not_round_up_payload_size() {
    let mut backend = FakeBackend::new(1);
    let mut pool = LargePool::new();

    let a = pool.allocate(&mut backend, 200_001).unwrap();
    assert_eq!(unsafe { (*a).size }, 200_001);
    assert_eq!(pool.bytes(), 200_001);
  }

  #[test]
  fn each_allocation_gets_its_own_mapping() {
    let mut backend = FakeBackend::new(1);
    let mut pool = LargePool::new();

    let a = pool.allocate(&mut backend, 150_000).unwrap();
    let b = pool.allocate(&mut backend, 150_000).unwrap();
    assert_ne!(a, b);
    assert_eq!(pool.count(), 2);
    assert_eq!(pool.bytes(), 300_000);
  }
}
