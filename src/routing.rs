//! Routing of operations onto operation threads
//!
//! Partition operations go to a fixed thread: `partition_id mod pool_size`.
//! Generic operations go to a thread picked by a [`ThreadSelector`], uniformly
//! at random by default.

use rand::Rng;

/// Partition identifier; negative values mark partition-independent work
pub type PartitionId = i32;

/// Marker for operations that do not belong to a partition
pub const GENERIC_PARTITION_ID: PartitionId = -1;

/// Whether `partition_id` addresses a partition
#[inline]
pub fn is_partition_specific(partition_id: PartitionId) -> bool {
    partition_id >= 0
}

/// Index of the partition thread that owns `partition_id`
///
/// Returns `None` for negative ids or an empty pool.
#[inline]
pub fn to_partition_thread_index(partition_id: PartitionId, pool_size: usize) -> Option<usize> {
    if partition_id < 0 || pool_size == 0 {
        return None;
    }
    Some(partition_id as usize % pool_size)
}

/// Strategy for picking a generic operation thread
pub trait ThreadSelector: Send + Sync {
    /// Pick an index in `0..pool_size`; `pool_size` is never zero
    fn select(&self, pool_size: usize) -> usize;
}

/// Uniform random selection, safe for concurrent callers
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelector;

impl RandomSelector {
    /// Create a new random selector
    pub fn new() -> Self {
        Self
    }
}

impl ThreadSelector for RandomSelector {
    fn select(&self, pool_size: usize) -> usize {
        rand::thread_rng().gen_range(0..pool_size)
    }
}

/// Custom selector that allows user-defined logic
impl<F> ThreadSelector for F
where
    F: Fn(usize) -> usize + Send + Sync,
{
    fn select(&self, pool_size: usize) -> usize {
        self(pool_size) % pool_size
    }
}
