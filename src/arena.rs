//! The block manager: carves, splits, coalesces and extends the
//! monotonically-growing heap arena.
//!
//! A block is created by arena growth, by splitting an existing free
//! block, or (for the wilderness) by in-place extension. It transitions
//! between in-use and free via [`Arena::allocate`]/[`Arena::free`];
//! coalescence may merge it into a neighbour, at which point its header
//! ceases to exist. Heap blocks, once created, exist forever — this
//! allocator never shrinks the break (see the crate's Non-goals).

use std::ptr;

use crate::align::align8;
use crate::backend::OsBackend;
use crate::error::AllocError;
use crate::header::{BlockHeader, HEADER_SIZE, Link, header_to_payload};

/// Minimum leftover, in bytes, worth carving into its own free block. A
/// remainder at or below this is kept as internal fragmentation on the
/// block that was just committed.
const MIN_SPLIT_REMAINDER: usize = 128;

/// Owns the two indices over the heap: the address-ordered list of every
/// block (`addr_head`/`addr_tail`) and the size-ordered list of free
/// blocks (`size_head`). `addr_tail` doubles as the wilderness pointer —
/// the unique address-highest block, whose payload-end coincides with the
/// program break.
pub(crate) struct Arena {
  addr_head: Link,
  addr_tail: Link,
  size_head: Link,
}

impl Arena {
  pub(crate) const fn new() -> Self {
    Self { addr_head: ptr::null_mut(), addr_tail: ptr::null_mut(), size_head: ptr::null_mut() }
  }

  /// Services a request of `requested` bytes. Assumes the caller has
  /// already validated `requested` against the public size bounds.
  pub(crate) fn allocate<B: OsBackend>(
    &mut self,
    backend: &mut B,
    requested: usize,
  ) -> Result<Link, AllocError> {
    let need = align8(requested);

    if let Some(candidate) = self.best_fit(need) {
      self.remove_from_free_index(candidate);
      unsafe { (*candidate).free = false };
      self.split_rule(candidate, need);
      return Ok(candidate);
    }

    let wilderness = self.addr_tail;
    if !wilderness.is_null() && unsafe { (*wilderness).free } {
      let current = unsafe { (*wilderness).size };
      let grow = align8(need - current);
      unsafe { backend.break_grow(grow)? };
      self.remove_from_free_index(wilderness);
      unsafe {
        (*wilderness).size = need;
        (*wilderness).free = false;
      }
      return Ok(wilderness);
    }

    let base = unsafe { backend.break_grow(HEADER_SIZE + need)? };
    let block = base as Link;
    unsafe {
      BlockHeader::init(block, need, false);
    }
    self.append_to_address_list(block);
    Ok(block)
  }

  /// Marks `block` free and coalesces it with any free address-adjacent
  /// neighbour, per the allocator's free table (§4.1.2).
  pub(crate) fn free(&mut self, block: Link) {
    unsafe {
      (*block).free = true;

      let prev = (*block).addr_prev;
      let next = (*block).addr_next;
      let prev_free = !prev.is_null() && (*prev).free;
      let next_free = !next.is_null() && (*next).free;

      match (prev_free, next_free) {
        (false, false) => self.add_to_free_index(block),
        (true, false) => {
          self.remove_from_free_index(prev);
          (*prev).size = align8((*prev).size + HEADER_SIZE + (*block).size);
          self.remove_from_address_list(block);
          self.add_to_free_index(prev);
        }
        (false, true) => {
          self.remove_from_free_index(next);
          (*block).size = align8((*block).size + HEADER_SIZE + (*next).size);
          self.remove_from_address_list(next);
          self.add_to_free_index(block);
        }
        (true, true) => {
          self.remove_from_free_index(prev);
          self.remove_from_free_index(next);
          (*prev).size = align8((*prev).size + HEADER_SIZE + (*block).size + HEADER_SIZE + (*next).size);
          self.remove_from_address_list(block);
          self.remove_from_address_list(next);
          self.add_to_free_index(prev);
        }
      }
    }
  }

  /// Attempts to satisfy a reallocation in place, trying each of the
  /// cases A–G in the order the allocator's design calls for (in-place >
  /// lower-merge > wilderness-grow > upper-merge > both > relocation).
  /// Every successful case ends with a [`Arena::split_rule`] call on
  /// whichever block ends up holding the request.
  pub(crate) fn try_realloc<B: OsBackend>(
    &mut self,
    backend: &mut B,
    old: Link,
    requested: usize,
  ) -> Result<Link, AllocError> {
    let need = align8(requested);

    unsafe {
      let old_size = (*old).size;

      // Case A: the block already holds enough payload.
      if need <= old_size {
        self.split_rule(old, need);
        return Ok(old);
      }

      let prev = (*old).addr_prev;
      let next = (*old).addr_next;
      let prev_free = !prev.is_null() && (*prev).free;
      let next_free = !next.is_null() && (*next).free;

      // Case B: absorb a free lower neighbour.
      if prev_free && old_size + HEADER_SIZE + (*prev).size >= need {
        self.remove_from_free_index(prev);
        let merged = align8((*prev).size + HEADER_SIZE + old_size);
        copy_payload(old, prev, old_size);
        (*prev).size = merged;
        (*prev).free = false;
        self.remove_from_address_list(old);
        self.split_rule(prev, need);
        return Ok(prev);
      }

      // Case C / C': old is the wilderness — grow the break to fit, then
      // optionally fold a free lower neighbour into the grown block.
      if next.is_null() {
        let grow = need - old_size;
        backend.break_grow(grow)?;
        (*old).size = need;

        if prev_free {
          self.remove_from_free_index(prev);
          let merged = align8((*prev).size + HEADER_SIZE + (*old).size);
          copy_payload(old, prev, old_size);
          (*prev).size = merged;
          (*prev).free = false;
          self.remove_from_address_list(old);
          self.split_rule(prev, need);
          return Ok(prev);
        }

        self.split_rule(old, need);
        return Ok(old);
      }

      // Case D: absorb a free higher neighbour.
      if next_free && old_size + HEADER_SIZE + (*next).size >= need {
        self.remove_from_free_index(next);
        (*old).size = align8(old_size + HEADER_SIZE + (*next).size);
        self.remove_from_address_list(next);
        self.split_rule(old, need);
        return Ok(old);
      }

      // Case E: absorb both neighbours at once.
      if prev_free && next_free && old_size + 2 * HEADER_SIZE + (*prev).size + (*next).size >= need {
        self.remove_from_free_index(prev);
        self.remove_from_free_index(next);
        let merged = align8((*prev).size + HEADER_SIZE + old_size + HEADER_SIZE + (*next).size);
        copy_payload(old, prev, old_size);
        (*prev).size = merged;
        (*prev).free = false;
        self.remove_from_address_list(old);
        self.remove_from_address_list(next);
        self.split_rule(prev, need);
        return Ok(prev);
      }

      // Case F: the higher neighbour is itself the (free) wilderness —
      // grow through it, then optionally fold a free lower neighbour too.
      if next_free && (*next).addr_next.is_null() {
        let available = old_size + HEADER_SIZE + (*next).size;
        let shortfall = align8(need - available);
        backend.break_grow(shortfall)?;

        self.remove_from_free_index(next);
        (*old).size = old_size + HEADER_SIZE + (*next).size + shortfall;
        self.remove_from_address_list(next);

        if prev_free {
          self.remove_from_free_index(prev);
          let merged = align8((*prev).size + HEADER_SIZE + (*old).size);
          copy_payload(old, prev, old_size);
          (*prev).size = merged;
          (*prev).free = false;
          self.remove_from_address_list(old);
          self.split_rule(prev, need);
          return Ok(prev);
        }

        self.split_rule(old, need);
        return Ok(old);
      }

      // Case G: give up and relocate.
      let relocated = self.allocate(backend, requested)?;
      let copy_len = old_size.min(requested);
      ptr::copy_nonoverlapping(header_to_payload(old), header_to_payload(relocated), copy_len);
      self.free(old);
      Ok(relocated)
    }
  }

  /// Committed to satisfy `need` bytes, carves `block`'s remainder into a
  /// new free block when it exceeds [`MIN_SPLIT_REMAINDER`]; otherwise
  /// the excess is retained as internal fragmentation and `block.size`
  /// stays at its pre-call value.
  fn split_rule(&mut self, block: Link, need: usize) {
    unsafe {
      let available = (*block).size;
      let remainder = available as isize - need as isize - HEADER_SIZE as isize;
      if remainder <= MIN_SPLIT_REMAINDER as isize {
        return;
      }

      let mut remainder = align8(remainder as usize);
      let new_block = (block as *mut u8).add(HEADER_SIZE + need) as Link;
      BlockHeader::init(new_block, remainder, true);

      (*new_block).addr_prev = block;
      (*new_block).addr_next = (*block).addr_next;
      if !(*block).addr_next.is_null() {
        (*(*block).addr_next).addr_prev = new_block;
      } else {
        self.addr_tail = new_block;
      }
      (*block).addr_next = new_block;
      (*block).size = need;

      // Restores I2: the carved block may now neighbour an already-free
      // block on its far side.
      let far = (*new_block).addr_next;
      if !far.is_null() && (*far).free {
        self.remove_from_free_index(far);
        remainder = align8(remainder + HEADER_SIZE + (*far).size);
        (*new_block).size = remainder;
        self.remove_from_address_list(far);
      }

      self.add_to_free_index(new_block);
    }
  }

  /// First-fit walk of the size-ordered index. Because the index is
  /// sorted (size ascending, address ascending for ties), the first hit
  /// is simultaneously the smallest sufficient block and, among ties,
  /// the lowest address — i.e. best-fit.
  fn best_fit(&self, need: usize) -> Option<Link> {
    let mut cur = self.size_head;
    unsafe {
      while !cur.is_null() {
        if (*cur).size >= need {
          return Some(cur);
        }
        cur = (*cur).size_next;
      }
    }
    None
  }

  fn add_to_free_index(&mut self, block: Link) {
    unsafe {
      let mut cur = self.size_head;
      let mut prev: Link = ptr::null_mut();

      while !cur.is_null() {
        let sorts_after =
          (*cur).size > (*block).size || ((*cur).size == (*block).size && (cur as usize) > (block as usize));
        if sorts_after {
          break;
        }
        prev = cur;
        cur = (*cur).size_next;
      }

      (*block).size_next = cur;
      (*block).size_prev = prev;
      if !cur.is_null() {
        (*cur).size_prev = block;
      }
      if !prev.is_null() {
        (*prev).size_next = block;
      } else {
        self.size_head = block;
      }
    }
  }

  fn remove_from_free_index(&mut self, block: Link) {
    unsafe {
      let prev = (*block).size_prev;
      let next = (*block).size_next;
      if prev.is_null() {
        self.size_head = next;
      } else {
        (*prev).size_next = next;
      }
      if !next.is_null() {
        (*next).size_prev = prev;
      }
      (*block).size_prev = ptr::null_mut();
      (*block).size_next = ptr::null_mut();
    }
  }

  fn remove_from_address_list(&mut self, block: Link) {
    unsafe {
      let prev = (*block).addr_prev;
      let next = (*block).addr_next;
      if prev.is_null() {
        self.addr_head = next;
      } else {
        (*prev).addr_next = next;
      }
      if next.is_null() {
        self.addr_tail = prev;
      } else {
        (*next).addr_prev = prev;
      }
      (*block).addr_prev = ptr::null_mut();
      (*block).addr_next = ptr::null_mut();
    }
  }

  fn append_to_address_list(&mut self, block: Link) {
    unsafe {
      (*block).addr_prev = self.addr_tail;
      (*block).addr_next = ptr::null_mut();
      if self.addr_tail.is_null() {
        self.addr_head = block;
      } else {
        (*self.addr_tail).addr_next = block;
      }
      self.addr_tail = block;
    }
  }

  pub(crate) fn total_heap_blocks(&self) -> u64 {
    self.walk_addr_list(|_| 1)
  }

  pub(crate) fn total_heap_bytes(&self) -> u64 {
    self.walk_addr_list(|b| unsafe { (*b).size } as u64)
  }

  pub(crate) fn free_heap_blocks(&self) -> u64 {
    self.walk_addr_list(|b| if unsafe { (*b).free } { 1 } else { 0 })
  }

  pub(crate) fn free_heap_bytes(&self) -> u64 {
    self.walk_addr_list(|b| if unsafe { (*b).free } { unsafe { (*b).size } as u64 } else { 0 })
  }

  fn walk_addr_list(&self, mut f: impl FnMut(Link) -> u64) -> u64 {
    let mut total = 0u64;
    let mut cur = self.addr_head;
    unsafe {
      while !cur.is_null() {
        total += f(cur);
        cur = (*cur).addr_next;
      }
    }
    total
  }
}

/// Copies `len` bytes of payload from `src_header`'s block to
/// `dst_header`'s block, tolerating the overlap that occurs when merging
/// into a lower-address neighbour (source address is always greater than
/// the destination's in that case).
unsafe fn copy_payload(src_header: Link, dst_header: Link, len: usize) {
  unsafe {
    let src = header_to_payload(src_header);
    let dst = header_to_payload(dst_header);
    ptr::copy(src, dst, len);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::FakeBackend;
  use crate::header::payload_to_header;

  const KIB: usize = 1024;

  fn new_backend() -> FakeBackend {
    FakeBackend::new(16 * KIB * KIB)
  }

  /// Checks P1–P7 (modulo the pool counters, which this module doesn't
  /// own) against the arena's own bookkeeping.
  fn assert_invariants(arena: &Arena) {
    let mut cur = arena.addr_head;
    let mut prev_was_free = false;
    let mut seen_tail = ptr::null_mut();
    unsafe {
      while !cur.is_null() {
        assert_eq!((*cur).size % 8, 0, "I5: payload size must be 8-aligned");
        assert!(!(prev_was_free && (*cur).free), "I2: no two adjacent frees");
        prev_was_free = (*cur).free;
        seen_tail = cur;
        cur = (*cur).addr_next;
      }
    }
    assert_eq!(seen_tail, arena.addr_tail, "addr_tail must track the real tail");

    let mut cur = arena.size_head;
    let mut last_size = 0usize;
    let mut last_addr = 0usize;
    unsafe {
      while !cur.is_null() {
        assert!((*cur).free, "I3: only free blocks sit in the free index");
        let size = (*cur).size;
        let addr = cur as usize;
        assert!(size > last_size || (size == last_size && addr >= last_addr), "I4: sort discipline");
        last_size = size;
        last_addr = addr;
        cur = (*cur).size_next;
      }
    }
  }

  #[test]
  fn s1_simple_reuse() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    let a = arena.allocate(&mut backend, 10).unwrap();
    assert_invariants(&arena);
    arena.free(a);
    assert_invariants(&arena);
    let b = arena.allocate(&mut backend, 10).unwrap();
    assert_invariants(&arena);

    assert_eq!(a, b);
    assert_eq!(arena.total_heap_blocks(), 1);
    assert_eq!(arena.total_heap_bytes(), 16);
    assert_eq!(arena.free_heap_blocks(), 0);
  }

  #[test]
  fn s2_two_block_reuse_and_final_coalesce() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    let a = arena.allocate(&mut backend, 10).unwrap();
    let b = arena.allocate(&mut backend, 10).unwrap();
    arena.free(a);
    let c = arena.allocate(&mut backend, 10).unwrap();
    assert_invariants(&arena);

    assert_eq!(c, a);
    assert_eq!(arena.total_heap_blocks(), 2);
    assert_eq!(arena.total_heap_bytes(), 32);
    assert_eq!(arena.free_heap_blocks(), 0);

    arena.free(b);
    arena.free(c);
    assert_invariants(&arena);

    assert_eq!(arena.total_heap_blocks(), 1);
    assert_eq!(arena.free_heap_blocks(), 1);
    assert_eq!(arena.total_heap_bytes(), 32 + HEADER_SIZE as u64);
  }

  #[test]
  fn s3_split_on_reuse() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    // Large enough that the remainder clears MIN_SPLIT_REMAINDER no
    // matter how big the real (>=32-byte) header turns out to be.
    let a = arena.allocate(&mut backend, 1000).unwrap();
    assert_eq!(unsafe { (*a).size }, 1000);
    arena.free(a);
    let b = arena.allocate(&mut backend, 10).unwrap();
    assert_invariants(&arena);

    assert_eq!(b, a);
    assert_eq!(arena.total_heap_blocks(), 2);
    assert_eq!(unsafe { (*b).size }, 16);
    assert_eq!(arena.free_heap_blocks(), 1);
    assert_eq!(arena.free_heap_bytes(), 1000 - 16 - HEADER_SIZE as u64);
  }

  #[test]
  fn s4_no_split_when_remainder_at_or_below_threshold() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    // Chosen so the leftover after carving is comfortably under the
    // 128-byte floor regardless of the exact header size.
    let a = arena.allocate(&mut backend, 200).unwrap();
    arena.free(a);
    let b = arena.allocate(&mut backend, 70).unwrap();
    assert_invariants(&arena);

    assert_eq!(b, a);
    assert_eq!(arena.total_heap_blocks(), 1);
    assert_eq!(unsafe { (*b).size }, 200);
    assert_eq!(arena.free_heap_blocks(), 0);
  }

  #[test]
  fn s5_wilderness_grows_on_realloc() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    let before = unsafe { backend.break_grow(0).unwrap() };
    let a = arena.allocate(&mut backend, 100).unwrap();
    let grown = arena.try_realloc(&mut backend, a, 200).unwrap();
    assert_invariants(&arena);

    assert_eq!(grown, a);
    let after = unsafe { backend.break_grow(0).unwrap() };
    assert_eq!(after as usize - before as usize, HEADER_SIZE + 104 + 96);
  }

  #[test]
  fn s7_coalesce_both_neighbours() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    let a = arena.allocate(&mut backend, 10).unwrap();
    let b = arena.allocate(&mut backend, 10).unwrap();
    let c = arena.allocate(&mut backend, 10).unwrap();

    arena.free(a);
    arena.free(c);
    arena.free(b);
    assert_invariants(&arena);

    assert_eq!(arena.total_heap_blocks(), 1);
    assert_eq!(arena.free_heap_blocks(), 1);
    assert_eq!(unsafe { (*a).size }, 16 + 16 + 16 + 2 * HEADER_SIZE);
  }

  #[test]
  fn realloc_same_size_is_identity() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    let a = arena.allocate(&mut backend, 40).unwrap();
    let b = arena.try_realloc(&mut backend, a, 40).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn realloc_merges_lower_free_neighbour() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    let a = arena.allocate(&mut backend, 200).unwrap();
    let b = arena.allocate(&mut backend, 10).unwrap();
    unsafe { header_to_payload(b).write(0xAB) };

    arena.free(a);
    let grown = arena.try_realloc(&mut backend, b, 180).unwrap();
    assert_invariants(&arena);

    assert_eq!(grown, a);
    assert_eq!(unsafe { header_to_payload(grown).read() }, 0xAB);
  }

  #[test]
  fn realloc_shrink_keeps_pointer_and_may_split() {
    let mut backend = new_backend();
    let mut arena = Arena::new();

    let a = arena.allocate(&mut backend, 500).unwrap();
    let shrunk = arena.try_realloc(&mut backend, a, 10).unwrap();
    assert_invariants(&arena);

    assert_eq!(shrunk, a);
    assert_eq!(unsafe { (*a).size }, 16);
    assert_eq!(arena.total_heap_blocks(), 2);
  }

  #[test]
  fn find_block_round_trip_through_payload_pointer() {
    let mut backend = new_backend();
    let mut arena = Arena::new();
    let a = arena.allocate(&mut backend, 24).unwrap();
    let payload = unsafe { header_to_payload(a) };
    assert_eq!(unsafe { payload_to_header(payload) }, a);
  }
}
