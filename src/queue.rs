//! Per-thread operation queues
//!
//! Every operation thread owns exactly two queues:
//!
//! - a **normal** queue: unbounded, FIFO, multi-producer, and the only place
//!   the thread ever blocks;
//! - a **priority** queue: unbounded, FIFO, polled without blocking.
//!
//! Any thread may push; only the owning operation thread pops.

use crate::error::Result;
use crate::task::WorkItem;
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one queue
#[repr(align(64))] // Align to cache line
#[derive(Debug, Default)]
pub struct QueueStats {
    offered: AtomicU64,
    taken: AtomicU64,
    rejected: AtomicU64,
}

impl QueueStats {
    /// Items accepted by the queue
    pub fn offered(&self) -> u64 {
        self.offered.load(Ordering::Relaxed)
    }

    /// Items removed by the consumer
    pub fn taken(&self) -> u64 {
        self.taken.load(Ordering::Relaxed)
    }

    /// Items the queue refused
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters
    pub fn counters(&self) -> QueueCounters {
        QueueCounters {
            offered: self.offered(),
            taken: self.taken(),
            rejected: self.rejected(),
        }
    }
}

/// Snapshot of [`QueueStats`], summable across queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    /// Items accepted
    pub offered: u64,

    /// Items removed by the consumer
    pub taken: u64,

    /// Items refused
    pub rejected: u64,
}

impl std::ops::Add for QueueCounters {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            offered: self.offered + other.offered,
            taken: self.taken + other.taken,
            rejected: self.rejected + other.rejected,
        }
    }
}

impl std::iter::Sum for QueueCounters {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |total, counters| total + counters)
    }
}

/// Producer half of an operation thread's normal queue
pub struct WorkQueue<T> {
    tx: flume::Sender<WorkItem<T>>,
    stats: Arc<QueueStats>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Create an unbounded normal queue
    pub fn unbounded() -> (WorkQueue<T>, WorkReceiver<T>) {
        let (tx, rx) = flume::unbounded();
        let stats = Arc::new(QueueStats::default());
        (
            WorkQueue {
                tx,
                stats: Arc::clone(&stats),
            },
            WorkReceiver { rx, stats },
        )
    }

    /// Append an item without blocking
    ///
    /// Fails only once the consuming thread has gone away.
    pub fn offer(&self, item: WorkItem<T>) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.stats.offered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(flume::TrySendError::Full(item) | flume::TrySendError::Disconnected(item)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(flume::SendError(item).into())
            }
        }
    }

    /// Items currently waiting; advisory only
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether no items are waiting
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Queue counters
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer half of the normal queue, owned by the operation thread
pub struct WorkReceiver<T> {
    rx: flume::Receiver<WorkItem<T>>,
    stats: Arc<QueueStats>,
}

impl<T> WorkReceiver<T> {
    /// Block until an item is available
    ///
    /// Returns `None` when every producer is gone.
    pub fn take(&self) -> Option<WorkItem<T>> {
        let item = self.rx.recv().ok()?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }
}

/// Non-blocking FIFO drained ahead of the normal queue
pub struct PriorityQueue<T> {
    inner: Arc<SegQueue<T>>,
    stats: Arc<QueueStats>,
}

impl<T> Clone for PriorityQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    /// Create an empty priority queue
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SegQueue::new()),
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Append a task; never blocks and never fails
    pub fn offer(&self, task: T) {
        self.inner.push(task);
        self.stats.offered.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove the oldest task, if any
    pub fn poll(&self) -> Option<T> {
        let task = self.inner.pop()?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(task)
    }

    /// Tasks currently waiting; advisory only
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no tasks are waiting
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Queue counters
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}
