//! Partition-affine operation scheduler
//!
//! The scheduler owns two fixed pools of operation threads:
//!
//! - **partition threads**: every operation for partition `p` runs on thread
//!   `p mod partition_pool_size`, for the lifetime of the scheduler;
//! - **generic threads**: operations without a partition (negative id) run on
//!   a thread picked uniformly at random.
//!
//! Submission never blocks. A priority submission goes to the target
//! thread's priority queue, followed by a wake signal on its normal queue so
//! the thread drains the priority work before its next normal task.

use crate::config::SchedulerConfig;
use crate::context::{self, SchedulerId, ThreadContext, ThreadKind};
use crate::error::{Error, Result};
use crate::processor::Processor;
use crate::queue::QueueCounters;
use crate::routing::{
    is_partition_specific, to_partition_thread_index, PartitionId, RandomSelector, ThreadSelector,
};
use crate::task::{Task, WorkItem};
use crate::worker::OperationThread;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Schedules operations onto generic and partition operation threads
pub struct OperationScheduler<T> {
    /// Process-unique id, carried by every thread's context
    id: SchedulerId,

    /// Partition-independent operations run here
    generic_threads: Vec<OperationThread<T>>,

    /// Operations for a partition always run on the same one of these
    partition_threads: Vec<OperationThread<T>>,

    /// Picks a generic thread
    selector: Box<dyn ThreadSelector>,

    termination_timeout: Duration,
}

impl<T: Task> OperationScheduler<T> {
    /// Create a scheduler and start all of its threads
    pub fn new<P>(config: SchedulerConfig, processor: P) -> Result<Self>
    where
        P: Processor<T>,
    {
        Self::with_selector(config, processor, RandomSelector::new())
    }

    /// Create a scheduler with a custom generic-thread selector
    pub fn with_selector<P, S>(config: SchedulerConfig, processor: P, selector: S) -> Result<Self>
    where
        P: Processor<T>,
        S: ThreadSelector + 'static,
    {
        config.validate()?;

        let id = context::next_scheduler_id();
        let processor: Arc<dyn Processor<T>> = Arc::new(processor);

        let mut scheduler = Self {
            id,
            generic_threads: Vec::new(),
            partition_threads: Vec::new(),
            selector: Box::new(selector),
            termination_timeout: config.termination_timeout,
        };

        // On a spawn failure, dropping the half-built scheduler stops the
        // threads started so far.
        scheduler.generic_threads = start_threads(
            id,
            ThreadKind::Generic,
            config.resolved_generic_threads(),
            &config,
            &processor,
        )?;
        scheduler.partition_threads = start_threads(
            id,
            ThreadKind::Partition,
            config.resolved_partition_threads(),
            &config,
            &processor,
        )?;

        tracing::debug!(
            scheduler = id,
            generic = scheduler.generic_threads.len(),
            partition = scheduler.partition_threads.len(),
            "operation scheduler started"
        );

        Ok(scheduler)
    }

    /// Submit a task
    ///
    /// A negative `partition_id` sends the task to a random generic thread,
    /// otherwise it goes to the partition thread owning `partition_id`.
    /// With `priority` set, the task jumps ahead of that thread's pending
    /// normal work.
    ///
    /// Fails only when `task` is absent. Once accepted, the outcome of the
    /// task never reaches the caller; a queue refusing the task (after
    /// shutdown) is logged and the task is dropped.
    pub fn execute(
        &self,
        task: impl Into<Option<T>>,
        partition_id: PartitionId,
        priority: bool,
    ) -> Result<()> {
        let task = task
            .into()
            .ok_or(Error::InvalidArgument("task must not be absent"))?;

        let thread = self.operation_thread(partition_id);
        tracing::trace!(
            partition_id,
            thread = %thread.name(),
            priority,
            "routing task"
        );

        if priority {
            thread.priority_queue().offer(task);
            offer_work(thread, WorkItem::Wake);
        } else {
            offer_work(thread, WorkItem::Task(task));
        }
        Ok(())
    }

    fn operation_thread(&self, partition_id: PartitionId) -> &OperationThread<T> {
        match to_partition_thread_index(partition_id, self.partition_threads.len()) {
            Some(index) => &self.partition_threads[index],
            None => {
                let pool_size = self.generic_threads.len();
                &self.generic_threads[self.selector.select(pool_size) % pool_size]
            }
        }
    }
}

impl<T> OperationScheduler<T> {
    /// Id of this scheduler, as carried by its threads' contexts
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    /// Whether the calling thread may run work for `partition_id` inline
    ///
    /// Always true for a negative id. Otherwise true only on this
    /// scheduler's partition thread that owns `partition_id`.
    pub fn is_allowed_to_run_in_current_thread(&self, partition_id: PartitionId) -> bool {
        if !is_partition_specific(partition_id) {
            return true;
        }

        let Some(current) = self.current_thread() else {
            return false;
        };
        if !current.is_partition_thread() {
            return false;
        }

        self.partition_thread_index(partition_id) == Some(current.index)
    }

    /// Whether the calling thread may submit work for `partition_id`
    ///
    /// Threads outside this scheduler may always submit, as may any of its
    /// threads for a negative id. For a partition id, one of its threads may
    /// submit only if it is the partition thread owning that id.
    pub fn is_invocation_allowed_from_current_thread(&self, partition_id: PartitionId) -> bool {
        let Some(current) = self.current_thread() else {
            return true;
        };
        if !is_partition_specific(partition_id) {
            return true;
        }

        current.is_partition_thread()
            && self.partition_thread_index(partition_id) == Some(current.index)
    }

    /// Context of the calling thread if it belongs to this scheduler
    pub fn current_thread(&self) -> Option<ThreadContext> {
        context::current().filter(|ctx| ctx.scheduler_id == self.id)
    }

    /// Index of the partition thread owning `partition_id`
    pub fn partition_thread_index(&self, partition_id: PartitionId) -> Option<usize> {
        to_partition_thread_index(partition_id, self.partition_threads.len())
    }

    /// Tasks waiting in all normal queues; advisory only
    ///
    /// Wake signals still pending are included.
    pub fn operation_executor_queue_size(&self) -> usize {
        self.threads().map(|t| t.work_queue().len()).sum()
    }

    /// Tasks waiting in all priority queues; advisory only
    pub fn priority_operation_executor_queue_size(&self) -> usize {
        self.threads().map(|t| t.priority_queue().len()).sum()
    }

    /// Number of generic threads
    pub fn generic_thread_count(&self) -> usize {
        self.generic_threads.len()
    }

    /// Number of partition threads
    pub fn partition_thread_count(&self) -> usize {
        self.partition_threads.len()
    }

    /// Names of all threads, partition threads first
    pub fn thread_names(&self) -> Vec<String> {
        self.threads().map(|t| t.name().to_string()).collect()
    }

    /// Threads whose loop has not exited yet
    pub fn live_thread_count(&self) -> usize {
        self.threads().filter(|t| t.is_running()).count()
    }

    /// Tasks processed successfully across all threads
    pub fn processed_task_count(&self) -> u64 {
        self.threads().map(|t| t.stats().processed()).sum()
    }

    /// Tasks that failed or panicked across all threads
    pub fn failed_task_count(&self) -> u64 {
        self.threads().map(|t| t.stats().failed()).sum()
    }

    /// Queue counters summed over every normal and priority queue
    ///
    /// Wake and stop signals count as normal-queue items.
    pub fn queue_counters(&self) -> QueueCounters {
        self.threads()
            .flat_map(|t| [t.work_queue().stats().counters(), t.priority_queue().stats().counters()])
            .sum()
    }

    /// Stop all threads
    ///
    /// Every thread is signalled first, then each is given up to the
    /// termination timeout to exit. Threads still busy after that are left
    /// to finish on their own. Work still queued is dropped.
    pub fn shutdown(&self) {
        for thread in self.threads() {
            thread.shutdown();
        }

        let mut abandoned = 0;
        for thread in self.threads() {
            if !thread.await_termination(self.termination_timeout) {
                tracing::warn!(
                    thread = %thread.name(),
                    timeout = ?self.termination_timeout,
                    "operation thread did not terminate in time"
                );
                abandoned += 1;
            }
        }

        tracing::debug!(scheduler = self.id, abandoned, "operation scheduler shut down");
    }

    fn threads(&self) -> impl Iterator<Item = &OperationThread<T>> {
        self.partition_threads.iter().chain(self.generic_threads.iter())
    }
}

impl<T> fmt::Display for OperationScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OperationScheduler{{id={}, generic={}, partition={}}}",
            self.id,
            self.generic_threads.len(),
            self.partition_threads.len()
        )
    }
}

impl<T> Drop for OperationScheduler<T> {
    fn drop(&mut self) {
        // Best effort to stop all threads
        if self.live_thread_count() > 0 {
            self.shutdown();
        }
    }
}

fn start_threads<T: Task>(
    scheduler_id: SchedulerId,
    kind: ThreadKind,
    count: usize,
    config: &SchedulerConfig,
    processor: &Arc<dyn Processor<T>>,
) -> Result<Vec<OperationThread<T>>> {
    (0..count)
        .map(|index| {
            let context = ThreadContext {
                scheduler_id,
                kind,
                index,
            };
            OperationThread::spawn(context, config, Arc::clone(processor))
        })
        .collect()
}

// Queues are unbounded, so this only fails once the thread has exited.
fn offer_work<T: Task>(thread: &OperationThread<T>, item: WorkItem<T>) {
    if let Err(e) = thread.work_queue().offer(item) {
        tracing::error!(
            thread = %thread.name(),
            error = %e,
            "failed to offer work to operation thread"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{from_fn, ProcessError};
    use crate::routing::GENERIC_PARTITION_ID;
    use std::sync::atomic::{AtomicU64, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    fn small_config() -> SchedulerConfig {
        SchedulerConfig::new()
            .with_generic_threads(2)
            .with_partition_threads(4)
            .with_thread_name_prefix("unit")
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler =
            OperationScheduler::<u32>::new(small_config(), from_fn(|_: &u32, _| Ok(()))).unwrap();

        assert_eq!(scheduler.generic_thread_count(), 2);
        assert_eq!(scheduler.partition_thread_count(), 4);
        assert_eq!(scheduler.live_thread_count(), 6);
        assert!(scheduler
            .thread_names()
            .contains(&"unit.partition-operation.thread-3".to_string()));
        assert!(scheduler
            .thread_names()
            .contains(&"unit.generic-operation.thread-1".to_string()));

        scheduler.shutdown();
        assert_eq!(scheduler.live_thread_count(), 0);
    }

    #[test]
    fn test_absent_task_is_rejected() {
        let scheduler =
            OperationScheduler::<u32>::new(small_config(), from_fn(|_: &u32, _| Ok(()))).unwrap();

        assert_eq!(
            scheduler.execute(None::<u32>, 1, false),
            Err(Error::InvalidArgument("task must not be absent"))
        );
        assert!(scheduler.execute(None::<u32>, -1, true).is_err());
        assert!(scheduler.execute(5u32, 1, false).is_ok());
        assert!(scheduler.execute(Some(6u32), 1, true).is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = small_config().with_termination_timeout(Duration::ZERO);
        let result = OperationScheduler::<u32>::new(config, from_fn(|_: &u32, _| Ok(())));

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_partition_routing() {
        let (tx, rx) = flume::unbounded();
        let scheduler = OperationScheduler::new(
            small_config(),
            from_fn(move |partition: &i32, ctx| {
                tx.send((*partition, ctx)).unwrap();
                Ok(())
            }),
        )
        .unwrap();

        for partition in 0..16 {
            scheduler.execute(partition, partition, false).unwrap();
        }

        for _ in 0..16 {
            let (partition, ctx) = rx.recv_timeout(WAIT).unwrap();
            assert_eq!(ctx.kind, ThreadKind::Partition);
            assert_eq!(ctx.index, partition as usize % 4);
            assert_eq!(ctx.scheduler_id, scheduler.id());
        }
    }

    #[test]
    fn test_generic_routing_uses_selector() {
        let (tx, rx) = flume::unbounded();
        let scheduler = OperationScheduler::with_selector(
            small_config(),
            from_fn(move |_: &u32, ctx| {
                tx.send(ctx).unwrap();
                Ok(())
            }),
            |_pool_size: usize| 1usize,
        )
        .unwrap();

        for n in 0..10u32 {
            scheduler.execute(n, -1, n % 2 == 0).unwrap();
        }

        for _ in 0..10 {
            let ctx = rx.recv_timeout(WAIT).unwrap();
            assert_eq!(ctx.kind, ThreadKind::Generic);
            assert_eq!(ctx.index, 1);
        }
    }

    #[test]
    fn test_affinity_checks_from_outside() {
        let scheduler =
            OperationScheduler::<u32>::new(small_config(), from_fn(|_: &u32, _| Ok(()))).unwrap();

        assert!(scheduler.is_allowed_to_run_in_current_thread(-1));
        assert!(!scheduler.is_allowed_to_run_in_current_thread(0));
        assert!(scheduler.is_invocation_allowed_from_current_thread(0));
        assert!(scheduler.is_invocation_allowed_from_current_thread(-5));
        assert_eq!(scheduler.current_thread(), None);
    }

    #[test]
    fn test_queue_sizes_while_blocked() {
        let (release, gate) = flume::bounded::<()>(0);
        let (started_tx, started_rx) = flume::bounded::<()>(1);
        let scheduler = OperationScheduler::new(
            small_config(),
            from_fn(move |block: &bool, _| {
                if *block {
                    started_tx.send(()).unwrap();
                    gate.recv().map_err(|e| ProcessError::failed(e.to_string()))?;
                }
                Ok(())
            }),
        )
        .unwrap();

        scheduler.execute(true, 0, false).unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        for _ in 0..3 {
            scheduler.execute(false, 0, false).unwrap();
        }
        scheduler.execute(false, 4, true).unwrap();
        scheduler.execute(false, 8, true).unwrap();

        // Three tasks plus two wake signals on the normal queue
        assert_eq!(scheduler.operation_executor_queue_size(), 5);
        assert_eq!(scheduler.priority_operation_executor_queue_size(), 2);

        release.send(()).unwrap();
        scheduler.shutdown();
    }

    #[test]
    fn test_display() {
        let scheduler =
            OperationScheduler::<u32>::new(small_config(), from_fn(|_: &u32, _| Ok(()))).unwrap();
        assert_eq!(
            scheduler.to_string(),
            format!("OperationScheduler{{id={}, generic=2, partition=4}}", scheduler.id())
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler =
            OperationScheduler::<u32>::new(small_config(), from_fn(|_: &u32, _| Ok(()))).unwrap();

        scheduler.shutdown();
        scheduler.shutdown();
        assert_eq!(scheduler.live_thread_count(), 0);

        // Submitting afterwards is logged and dropped
        assert!(scheduler.execute(1u32, 2, false).is_ok());
        assert!(scheduler.execute(1u32, -1, true).is_ok());
    }

    struct Overshooting;

    impl ThreadSelector for Overshooting {
        fn select(&self, pool_size: usize) -> usize {
            pool_size + 1
        }
    }

    #[test]
    fn test_out_of_range_selection_wraps() {
        let (tx, rx) = flume::unbounded();
        let scheduler = OperationScheduler::with_selector(
            small_config(),
            from_fn(move |_: &u32, ctx| {
                tx.send(ctx).unwrap();
                Ok(())
            }),
            Overshooting,
        )
        .unwrap();

        scheduler.execute(1u32, GENERIC_PARTITION_ID, false).unwrap();
        scheduler.execute(2u32, GENERIC_PARTITION_ID, true).unwrap();

        for _ in 0..2 {
            let ctx = rx.recv_timeout(WAIT).unwrap();
            assert_eq!(ctx.kind, ThreadKind::Generic);
            assert_eq!(ctx.index, 1);
        }
    }

    #[test]
    fn test_queue_counters() {
        let (tx, rx) = flume::unbounded();
        let scheduler = OperationScheduler::new(
            small_config(),
            from_fn(move |n: &u32, _| {
                tx.send(*n).unwrap();
                Ok(())
            }),
        )
        .unwrap();

        for n in 0..3u32 {
            scheduler.execute(n, 0, false).unwrap();
        }
        scheduler.execute(3u32, 1, true).unwrap();
        for _ in 0..4 {
            rx.recv_timeout(WAIT).unwrap();
        }
        scheduler.shutdown();

        // Three tasks, one wake signal, one priority task, six stop signals
        assert_eq!(
            scheduler.queue_counters(),
            QueueCounters {
                offered: 11,
                taken: 11,
                rejected: 0,
            }
        );

        scheduler.execute(4u32, 2, false).unwrap();
        assert_eq!(scheduler.queue_counters().rejected, 1);
    }

    #[test]
    fn test_drop_stops_threads() {
        let processed = Arc::new(AtomicU64::new(0));
        let released = Arc::downgrade(&processed);
        let scheduler = OperationScheduler::new(
            small_config(),
            from_fn(move |_: &u32, _| {
                processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        )
        .unwrap();
        let queue = scheduler.partition_threads[0].work_queue().clone();

        for n in 0..8u32 {
            scheduler.execute(n, n as PartitionId, false).unwrap();
        }
        drop(scheduler);

        assert!(released.upgrade().is_none());
        assert!(queue.offer(WorkItem::Task(9)).is_err());
    }
}
