//! Operation threads
//!
//! An operation thread is a dedicated OS thread owning one normal queue and
//! one priority queue. Its loop:
//!
//! 1. blocks taking the next item from the normal queue;
//! 2. exits if shutdown was requested, dropping that item unprocessed;
//! 3. drains the priority queue completely;
//! 4. processes the normal item, unless it was only a wake signal.
//!
//! A task that fails or panics is logged and the loop continues. A task that
//! reports resource exhaustion is handed to [`crate::fatal`] and the thread
//! terminates.

use crate::config::SchedulerConfig;
use crate::context::{ScopedThreadContext, ThreadContext};
use crate::error::{Error, Result};
use crate::fatal::{self, ResourceExhaustion};
use crate::processor::{ProcessError, Processor};
use crate::queue::{PriorityQueue, WorkQueue, WorkReceiver};
use crate::task::{Task, WorkItem};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Processing counters for one operation thread
#[derive(Debug, Default)]
pub struct ThreadStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl ThreadStats {
    /// Tasks processed successfully
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error or panicked
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Handle to a running operation thread
pub struct OperationThread<T> {
    /// Identity, fixed for the thread's lifetime
    context: ThreadContext,

    /// OS thread name
    name: String,

    /// Producer half of the normal queue
    work_queue: WorkQueue<T>,

    /// Priority queue, shared with the thread
    priority_queue: PriorityQueue<T>,

    /// Set once shutdown is requested
    shutdown: Arc<AtomicBool>,

    /// Cleared when the run loop has exited
    running: Arc<AtomicBool>,

    stats: Arc<ThreadStats>,

    /// Disconnects when the thread exits
    exit_rx: flume::Receiver<()>,

    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Task> OperationThread<T> {
    /// Spawn an operation thread and start its loop
    pub fn spawn(
        context: ThreadContext,
        config: &SchedulerConfig,
        processor: Arc<dyn Processor<T>>,
    ) -> Result<Self> {
        let name = context.thread_name(&config.thread_name_prefix);
        let (work_queue, receiver) = WorkQueue::unbounded();
        let priority_queue = PriorityQueue::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ThreadStats::default());
        let (exit_tx, exit_rx) = flume::bounded::<()>(0);

        let run_loop = RunLoop {
            context,
            name: name.clone(),
            receiver,
            priority_queue: priority_queue.clone(),
            processor,
            shutdown: Arc::clone(&shutdown),
            stats: Arc::clone(&stats),
        };
        let cpu_affinity = config.enable_cpu_affinity.then_some(context.index);
        let running_flag = Arc::clone(&running);

        let mut thread_builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = config.stack_size {
            thread_builder = thread_builder.stack_size(stack_size);
        }

        let thread_handle = thread_builder
            .spawn(move || {
                let _exit = ExitGuard {
                    running: running_flag,
                    _exit_tx: exit_tx,
                };
                // Consumes the loop state, so queued tasks and the processor
                // are released before the exit guard reports termination
                run_operation_thread(run_loop, cpu_affinity);
            })
            .map_err(|e| Error::SpawnFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            context,
            name,
            work_queue,
            priority_queue,
            shutdown,
            running,
            stats,
            exit_rx,
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }
}

impl<T> OperationThread<T> {
    /// Identity of the thread
    pub fn context(&self) -> ThreadContext {
        self.context
    }

    /// Name of the thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normal queue of the thread
    pub fn work_queue(&self) -> &WorkQueue<T> {
        &self.work_queue
    }

    /// Priority queue of the thread
    pub fn priority_queue(&self) -> &PriorityQueue<T> {
        &self.priority_queue
    }

    /// Processing counters
    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    /// Whether the run loop is still going
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request the thread to stop
    ///
    /// Sets the shutdown flag, then pushes a stop signal so a thread blocked
    /// on an empty normal queue wakes up and sees the flag.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if self.work_queue.offer(WorkItem::Stop).is_err() {
            tracing::debug!(thread = %self.name, "operation thread already gone");
        }
    }

    /// Wait up to `timeout` for the thread to exit
    ///
    /// Returns whether it exited. A thread that does not exit in time is
    /// left running; waiting again later is allowed.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        match self.exit_rx.recv_timeout(timeout) {
            Err(flume::RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                let handle = self.thread_handle.lock().take();
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        tracing::error!(thread = %self.name, "operation thread panicked");
                    }
                }
                true
            }
        }
    }
}

fn run_operation_thread<T: Task>(run_loop: RunLoop<T>, cpu_affinity: Option<usize>) {
    if let Some(index) = cpu_affinity {
        pin_to_core(index);
    }

    let span = tracing::debug_span!("operation_thread", thread = %run_loop.name);
    let _enter = span.enter();
    let _context = ScopedThreadContext::enter(run_loop.context);

    tracing::debug!("operation thread started");
    match run_loop.run() {
        Ok(()) => tracing::debug!("operation thread stopped"),
        Err(event) => fatal::on_resource_exhaustion(&event),
    }
}

/// Marks the thread as terminated on every exit path
struct ExitGuard {
    running: Arc<AtomicBool>,
    _exit_tx: flume::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// State moved onto the operation thread
struct RunLoop<T> {
    context: ThreadContext,
    name: String,
    receiver: WorkReceiver<T>,
    priority_queue: PriorityQueue<T>,
    processor: Arc<dyn Processor<T>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ThreadStats>,
}

impl<T: Task> RunLoop<T> {
    fn run(&self) -> std::result::Result<(), ResourceExhaustion> {
        loop {
            let Some(item) = self.receiver.take() else {
                return Ok(());
            };

            // The item just taken is dropped if shutdown was requested meanwhile
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }

            self.process_priority_tasks()?;

            match item {
                WorkItem::Task(task) => self.process(task)?,
                WorkItem::Wake => {}
                WorkItem::Stop => return Ok(()),
            }
        }
    }

    fn process_priority_tasks(&self) -> std::result::Result<(), ResourceExhaustion> {
        while let Some(task) = self.priority_queue.poll() {
            self.process(task)?;
        }
        Ok(())
    }

    fn process(&self, task: T) -> std::result::Result<(), ResourceExhaustion> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.processor.process(&task, self.context)
        }));

        match outcome {
            Ok(Ok(())) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(ProcessError::Failed(reason))) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    thread = %self.name,
                    task = ?task,
                    error = %reason,
                    "failed to process task"
                );
            }
            Ok(Err(ProcessError::ResourceExhausted(message))) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return Err(ResourceExhaustion {
                    thread_name: self.name.clone(),
                    message,
                });
            }
            Err(payload) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    thread = %self.name,
                    task = ?task,
                    panic = %panic_message(&*payload),
                    "task panicked"
                );
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

fn pin_to_core(index: usize) {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if !core_ids.is_empty() {
            core_affinity::set_for_current(core_ids[index % core_ids.len()]);
        }
    }
}
