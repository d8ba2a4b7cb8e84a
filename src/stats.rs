//! Snapshot of the allocator's six introspection counters.

/// A consistent, point-in-time read of the allocator's bookkeeping.
///
/// Each field corresponds to one of the six stat functions on the public
/// surface (`num_free_blocks`, `num_free_bytes`, `num_allocated_blocks`,
/// `num_allocated_bytes`, `num_meta_data_bytes`, `size_meta_data`); this
/// struct exists so Rust callers can take one lock and read all six
/// instead of six separate locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
  pub free_blocks: u64,
  pub free_bytes: u64,
  pub allocated_blocks: u64,
  pub allocated_bytes: u64,
  pub meta_data_bytes: u64,
  pub size_meta_data: u64,
}
