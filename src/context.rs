//! Identity of operation threads
//!
//! Each operation thread knows which scheduler it belongs to, which pool it
//! is in and its index in that pool. The identity is handed to the processor
//! with every task and is also registered thread-locally, so code running on
//! an operation thread can ask "which thread am I" without a handle.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Unique identifier for a scheduler within the process
pub type SchedulerId = u64;

static SCHEDULER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocate a process-unique scheduler id
pub(crate) fn next_scheduler_id() -> SchedulerId {
    SCHEDULER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Pool an operation thread belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum ThreadKind {
    /// Runs partition-independent operations
    Generic,

    /// Runs every operation for the partitions mapped to its index
    Partition,
}

impl ThreadKind {
    /// Pool name used in thread names
    pub fn pool_name(self) -> &'static str {
        match self {
            ThreadKind::Generic => "generic-operation",
            ThreadKind::Partition => "partition-operation",
        }
    }
}

/// Immutable identity of an operation thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct ThreadContext {
    /// Scheduler owning the thread
    pub scheduler_id: SchedulerId,

    /// Pool the thread belongs to
    pub kind: ThreadKind,

    /// Index within the pool
    pub index: usize,
}

impl ThreadContext {
    /// Whether this is a partition thread
    pub fn is_partition_thread(&self) -> bool {
        self.kind == ThreadKind::Partition
    }

    /// Thread name under `prefix`
    pub fn thread_name(&self, prefix: &str) -> String {
        format!("{}.{}.thread-{}", prefix, self.kind.pool_name(), self.index)
    }
}

impl fmt::Display for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}@{}",
            self.kind.pool_name(),
            self.index,
            self.scheduler_id
        )
    }
}

thread_local! {
    static CURRENT: Cell<Option<ThreadContext>> = const { Cell::new(None) };
}

/// Identity of the calling thread, if it is an operation thread
pub fn current() -> Option<ThreadContext> {
    CURRENT.with(|c| c.get())
}

/// Registers a thread identity for as long as it is alive
///
/// Operation threads hold one of these for the whole run loop; dropping it
/// restores whatever was registered before.
pub(crate) struct ScopedThreadContext {
    prev: Option<ThreadContext>,
}

impl ScopedThreadContext {
    pub(crate) fn enter(context: ThreadContext) -> Self {
        let prev = CURRENT.with(|c| c.replace(Some(context)));
        Self { prev }
    }
}

impl Drop for ScopedThreadContext {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.prev));
    }
}
