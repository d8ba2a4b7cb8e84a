use std::mem;
use std::ptr;

/// Fixed-size bookkeeping prefix that precedes every block's payload, heap
/// or mapped alike. Heap blocks use every field; mapped blocks only ever
/// populate `size` and leave `free` at `false` (the four pointer slots stay
/// null, see [`crate::pool`]).
#[repr(C)]
pub(crate) struct BlockHeader {
  /// Bytes available to the user, excluding this header.
  pub size: usize,
  /// Whether the block currently sits on the size-ordered free index.
  pub free: bool,
  /// Neighbour in the address-ordered heap list (lower address), or null.
  pub addr_prev: Link,
  /// Neighbour in the address-ordered heap list (higher address), or null.
  pub addr_next: Link,
  /// Neighbour in the size-ordered free index (smaller/equal), or null.
  pub size_prev: Link,
  /// Neighbour in the size-ordered free index (larger), or null.
  pub size_next: Link,
}

/// A raw pointer to a block header. The arena is the sole owner of every
/// block; these pointers are pure navigation aids, not an ownership
/// discipline (see the crate-level Safety notes).
pub(crate) type Link = *mut BlockHeader;

/// `H` in the allocator's own vocabulary: the number of bytes the header
/// occupies, reported verbatim by [`crate::stats::AllocStats::header_size`].
pub(crate) const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

impl BlockHeader {
  /// Initialises a freshly-carved block's fields in place. Does not touch
  /// any linked list; callers splice the block in themselves.
  ///
  /// # Safety
  /// `block` must point to at least `HEADER_SIZE` writable bytes.
  pub(crate) unsafe fn init(block: Link, size: usize, free: bool) {
    unsafe {
      (*block).size = size;
      (*block).free = free;
      (*block).addr_prev = ptr::null_mut();
      (*block).addr_next = ptr::null_mut();
      (*block).size_prev = ptr::null_mut();
      (*block).size_next = ptr::null_mut();
    }
  }
}

/// Converts a header address into the user-visible payload pointer.
///
/// # Safety
/// `block` must be a valid, non-null header.
#[inline]
pub(crate) unsafe fn header_to_payload(block: Link) -> *mut u8 {
  unsafe { (block as *mut u8).add(HEADER_SIZE) }
}

/// Recovers a block's header from a user-visible payload pointer.
///
/// # Safety
/// `ptr` must have been returned by this allocator's `allocate`/`reallocate`
/// and must not already have been freed.
#[inline]
pub(crate) unsafe fn payload_to_header(ptr: *mut u8) -> Link {
  unsafe { ptr.sub(HEADER_SIZE) as Link }
}
