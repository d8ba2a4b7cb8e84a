//! A user-space general-purpose allocator over a process-private heap.
//!
//! Requests of 128 KiB or less are served from a single growable arena:
//! an address-ordered list of blocks layered with a size-ordered index
//! over the free ones, so a new request is satisfied by the smallest
//! free block that fits (first-fit over the size index, which sorts
//! ties by address). When nothing fits, the arena either grows its
//! highest block in place (if it happens to be free — the "wilderness")
//! or appends a fresh one by pushing the break further out:
//!
//! ```text
//!  addr_head ─▶ [ in use ] ─▶ [ free ] ─▶ [ in use ] ─▶ [ wilderness ]
//!                   │                         │
//!                   ▼ (size index)            ▼
//!               size_head ─▶ ... ─▶ [ larger frees ] ─▶ ...
//! ```
//!
//! Requests above that threshold go straight to their own anonymous
//! mapping, released back to the OS on free instead of recycled (see
//! [`pool`]).
//!
//! The crate exposes two surfaces over the same process-wide instance:
//! [`RAllocator`] implements [`std::alloc::GlobalAlloc`] for use as
//! `#[global_allocator]`, and the free functions ([`allocate`], [`free`],
//! ...) mirror the allocator's original C-style API for callers porting
//! code that already targets it.
//!
//! # Safety
//!
//! Every block is addressed through raw pointers threaded through the
//! arena's two intrusive lists; there is no `Box`/`Vec`-style ownership
//! anywhere below [`allocator::Core`]. The arena is the sole logical
//! owner of every block it hands out, and a caller is expected to honor
//! the same contract `malloc`/`free` always have: a pointer is live from
//! the call that returned it until the matching `free`, exactly once.

mod align;
mod allocator;
mod arena;
mod backend;
mod error;
mod header;
mod pool;
mod stats;
mod sync;

pub use allocator::{
  RAllocator, allocate, free, num_allocated_blocks, num_allocated_bytes, num_free_blocks, num_free_bytes,
  num_meta_data_bytes, reallocate, size_meta_data, zeroed_allocate,
};
pub use error::AllocError;
pub use stats::AllocStats;
