//! Ties the arena and the large-block pool together behind one
//! `Result`-returning core, then exposes that core two ways: as a
//! [`std::alloc::GlobalAlloc`] for idiomatic Rust callers, and as a set
//! of C-style free functions for callers porting from the allocator's
//! original surface.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr;

use tracing::{trace, warn};

use crate::arena::Arena;
use crate::backend::{OsBackend, SystemBackend};
use crate::error::AllocError;
use crate::header::{HEADER_SIZE, header_to_payload, payload_to_header};
use crate::pool::LargePool;
use crate::stats::AllocStats;
use crate::sync::Locked;

/// Requests strictly above this many bytes bypass the arena and get a
/// dedicated mapping from [`LargePool`].
const MMAP_THRESHOLD: usize = 131_072;

/// No single request may ask for more than this many bytes; callers
/// above this bound are rejected with [`AllocError::InvalidSize`] before
/// any OS call is attempted.
const MAX_REQUEST: usize = 100_000_000;

/// The allocator's state, minus any locking discipline: one arena for
/// small/medium requests, one pool for large ones, and whichever OS
/// backend `B` supplies the underlying primitives.
pub(crate) struct Core<B: OsBackend> {
  arena: Arena,
  pool: LargePool,
  backend: B,
}

impl<B: OsBackend> Core<B> {
  pub(crate) const fn with_backend(backend: B) -> Self {
    Self { arena: Arena::new(), pool: LargePool::new(), backend }
  }

  pub(crate) fn allocate(&mut self, requested: usize) -> Result<*mut u8, AllocError> {
    validate_size(requested)?;

    let block = if requested > MMAP_THRESHOLD {
      self.pool.allocate(&mut self.backend, requested)?
    } else {
      self.arena.allocate(&mut self.backend, requested)?
    };

    trace!(requested, "allocate");
    Ok(unsafe { header_to_payload(block) })
  }

  pub(crate) fn zeroed_allocate(&mut self, num: usize, size: usize) -> Result<*mut u8, AllocError> {
    let total = num.checked_mul(size).ok_or(AllocError::InvalidSize { requested: u64::MAX, max: MAX_REQUEST as u64 })?;
    let ptr = self.allocate(total)?;
    unsafe { ptr::write_bytes(ptr, 0, total) };
    Ok(ptr)
  }

  /// Frees `ptr`, a no-op if null. Classifies the block by size, mirroring
  /// the same threshold `allocate` used to route it in the first place.
  pub(crate) fn free(&mut self, ptr: *mut u8) {
    if ptr.is_null() {
      return;
    }
    let block = unsafe { payload_to_header(ptr) };
    let size = unsafe { (*block).size };

    if size > MMAP_THRESHOLD {
      if let Err(err) = self.pool.free(&mut self.backend, block) {
        warn!(?err, "failed to unmap large block");
      }
    } else {
      self.arena.free(block);
    }
    trace!(size, "free");
  }

  pub(crate) fn reallocate(&mut self, ptr: *mut u8, requested: usize) -> Result<*mut u8, AllocError> {
    if ptr.is_null() {
      return self.allocate(requested);
    }
    validate_size(requested)?;

    let block = unsafe { payload_to_header(ptr) };
    let old_size = unsafe { (*block).size };

    // A block that crosses the threshold in either direction always
    // relocates: the arena and the pool don't share a split/coalesce
    // protocol, so in-place growth/shrinkage across the boundary isn't
    // representable.
    let stays_in_arena = old_size <= MMAP_THRESHOLD && requested <= MMAP_THRESHOLD;
    let stays_in_pool = old_size > MMAP_THRESHOLD && requested > MMAP_THRESHOLD;

    let new_ptr = if stays_in_arena {
      let new_block = self.arena.try_realloc(&mut self.backend, block, requested)?;
      unsafe { header_to_payload(new_block) }
    } else if stays_in_pool {
      // The pool never shrinks or grows a mapping in place; relocate.
      self.relocate(ptr, old_size, requested)?
    } else {
      self.relocate(ptr, old_size, requested)?
    };

    trace!(old_size, requested, "reallocate");
    Ok(new_ptr)
  }

  fn relocate(&mut self, old_ptr: *mut u8, old_size: usize, requested: usize) -> Result<*mut u8, AllocError> {
    let new_ptr = self.allocate(requested)?;
    let copy_len = old_size.min(requested);
    unsafe { ptr::copy_nonoverlapping(old_ptr, new_ptr, copy_len) };
    self.free(old_ptr);
    Ok(new_ptr)
  }

  pub(crate) fn stats(&self) -> AllocStats {
    AllocStats {
      free_blocks: self.arena.free_heap_blocks(),
      free_bytes: self.arena.free_heap_bytes(),
      allocated_blocks: self.arena.total_heap_blocks() + self.pool.count(),
      allocated_bytes: self.arena.total_heap_bytes() + self.pool.bytes(),
      meta_data_bytes: (self.arena.total_heap_blocks() + self.pool.count()) * HEADER_SIZE as u64,
      size_meta_data: HEADER_SIZE as u64,
    }
  }
}

fn validate_size(requested: usize) -> Result<(), AllocError> {
  if requested == 0 || requested > MAX_REQUEST {
    return Err(AllocError::InvalidSize { requested: requested as u64, max: MAX_REQUEST as u64 });
  }
  Ok(())
}

/// The process-wide allocator, usable as `#[global_allocator]`.
///
/// Wraps a [`Core<SystemBackend>`] in a [`Locked`] mutex: every heap
/// block in this crate is accessed through raw pointers with no
/// Rust-level ownership discipline, so without a lock two threads
/// calling into the same arena would be an immediate data race.
pub struct RAllocator {
  core: Locked<Core<SystemBackend>>,
}

impl RAllocator {
  /// Builds an allocator instance with nothing allocated yet. `const fn`
  /// so it can back a `static`.
  pub const fn new() -> Self {
    Self { core: Locked::new(Core::with_backend(SystemBackend)) }
  }

  /// Takes a consistent snapshot of the six introspection counters.
  pub fn stats(&self) -> AllocStats {
    self.core.lock().stats()
  }
}

impl Default for RAllocator {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl GlobalAlloc for RAllocator {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    if layout.align() > 8 {
      warn!(align = layout.align(), "alignment above 8 is not supported");
      return ptr::null_mut();
    }
    match self.core.lock().allocate(layout.size()) {
      Ok(ptr) => ptr,
      Err(err) => {
        warn!(?err, "alloc failed");
        ptr::null_mut()
      }
    }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    self.core.lock().free(ptr);
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    if layout.align() > 8 {
      warn!(align = layout.align(), "alignment above 8 is not supported");
      return ptr::null_mut();
    }
    match self.core.lock().reallocate(ptr, new_size) {
      Ok(new_ptr) => new_ptr,
      Err(err) => {
        warn!(?err, "realloc failed");
        ptr::null_mut()
      }
    }
  }
}

/// The allocator backing [`allocate`]/[`free`]/`...` below. Not installed
/// as `#[global_allocator]` by this crate itself — binaries that want
/// this allocator process-wide do that at their own top level; this
/// crate only guarantees the C-style surface routes through the same
/// instance.
static GLOBAL: RAllocator = RAllocator::new();

/// Returns a pointer to `size` usable bytes, or null on failure (`size`
/// is zero, exceeds the maximum request, or the OS primitive failed).
pub fn allocate(size: usize) -> *mut u8 {
  GLOBAL.core.lock().allocate(size).unwrap_or(ptr::null_mut())
}

/// Like [`allocate`], but the returned region is zeroed. `num * size`
/// overflowing `usize` is treated as an invalid request.
pub fn zeroed_allocate(num: usize, size: usize) -> *mut u8 {
  GLOBAL.core.lock().zeroed_allocate(num, size).unwrap_or(ptr::null_mut())
}

/// Releases a pointer previously returned by this module. Null is a
/// no-op.
pub fn free(ptr: *mut u8) {
  GLOBAL.core.lock().free(ptr);
}

/// Resizes a previous allocation, preserving the lesser of the old and
/// new sizes' worth of content. `ptr` null behaves like [`allocate`].
pub fn reallocate(ptr: *mut u8, size: usize) -> *mut u8 {
  GLOBAL.core.lock().reallocate(ptr, size).unwrap_or(ptr::null_mut())
}

pub fn num_free_blocks() -> u64 {
  GLOBAL.stats().free_blocks
}

pub fn num_free_bytes() -> u64 {
  GLOBAL.stats().free_bytes
}

pub fn num_allocated_blocks() -> u64 {
  GLOBAL.stats().allocated_blocks
}

pub fn num_allocated_bytes() -> u64 {
  GLOBAL.stats().allocated_bytes
}

pub fn num_meta_data_bytes() -> u64 {
  GLOBAL.stats().meta_data_bytes
}

pub fn size_meta_data() -> u64 {
  GLOBAL.stats().size_meta_data
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::FakeBackend;

  fn new_core() -> Core<FakeBackend> {
    Core::with_backend(FakeBackend::new(16 * 1024 * 1024))
  }

  #[test]
  fn rejects_zero_and_oversized_requests() {
    let mut core = new_core();
    assert!(core.allocate(0).is_err());
    assert!(core.allocate(MAX_REQUEST + 1).is_err());
  }

  #[test]
  fn small_requests_are_readable_and_writable() {
    let mut core = new_core();
    let ptr = core.allocate(64).unwrap();
    unsafe {
      ptr::write_bytes(ptr, 0xAB, 64);
      assert_eq!(*ptr, 0xAB);
    }
  }

  #[test]
  fn zeroed_allocate_zeroes_memory() {
    let mut core = new_core();
    let ptr = core.zeroed_allocate(16, 4).unwrap();
    let slice = unsafe { std::slice::from_raw_parts(ptr, 64) };
    assert!(slice.iter().all(|&b| b == 0));
  }

  #[test]
  fn large_requests_route_through_pool() {
    let mut core = new_core();
    let ptr = core.allocate(200_000).unwrap();
    let stats = core.stats();
    assert_eq!(stats.allocated_blocks, 1);
    assert_eq!(stats.allocated_bytes, 200_000);

    core.free(ptr);
    let stats = core.stats();
    assert_eq!(stats.allocated_blocks, 0);
  }

  #[test]
  fn large_requests_report_unaligned_size_verbatim() {
    let mut core = new_core();
    let ptr = core.allocate(200_001).unwrap();
    let stats = core.stats();
    assert_eq!(stats.allocated_bytes, 200_001);

    core.free(ptr);
    assert_eq!(core.stats().allocated_blocks, 0);
  }

  #[test]
  fn reallocate_null_behaves_like_allocate() {
    let mut core = new_core();
    let ptr = core.reallocate(ptr::null_mut(), 32).unwrap();
    assert!(!ptr.is_null());
  }

  #[test]
  fn reallocate_crossing_threshold_relocates() {
    let mut core = new_core();
    let small = core.allocate(64).unwrap();
    unsafe { ptr::write_bytes(small, 0x7, 64) };

    let big = core.reallocate(small, 200_000).unwrap();
    let slice = unsafe { std::slice::from_raw_parts(big, 64) };
    assert!(slice.iter().all(|&b| b == 0x7));
  }

  #[test]
  fn free_of_null_is_a_no_op() {
    let mut core = new_core();
    core.free(ptr::null_mut());
  }
}
