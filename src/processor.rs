//! The processor executes dequeued tasks
//!
//! Business logic lives behind [`Processor`]. The scheduler only decides on
//! which thread a task runs; what running it means is up to the processor.

use crate::context::ThreadContext;
use std::marker::PhantomData;
use thiserror::Error;

/// Failure reported by a processor for a single task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// The task failed; the operation thread logs it and moves on
    #[error("{0}")]
    Failed(String),

    /// Memory or a similar resource ran out; the operation thread stops
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ProcessError {
    /// Create a task failure
    pub fn failed(msg: impl Into<String>) -> Self {
        ProcessError::Failed(msg.into())
    }
}

/// Result of processing one task
pub type ProcessResult = std::result::Result<(), ProcessError>;

/// Executes tasks on operation threads
///
/// `process` runs inline in the operation thread's loop and must not block
/// indefinitely: while it runs, nothing else on that thread makes progress.
pub trait Processor<T>: Send + Sync + 'static {
    /// Execute `task` on the thread identified by `context`
    ///
    /// The operation thread keeps ownership of the task so it can still name
    /// it in the log if processing fails.
    fn process(&self, task: &T, context: ThreadContext) -> ProcessResult;
}

/// Processor backed by a closure, see [`from_fn`]
pub struct FnProcessor<F, T> {
    func: F,
    _task: PhantomData<fn(T)>,
}

/// Wrap a closure as a [`Processor`]
pub fn from_fn<T, F>(func: F) -> FnProcessor<F, T>
where
    F: Fn(&T, ThreadContext) -> ProcessResult + Send + Sync + 'static,
{
    FnProcessor {
        func,
        _task: PhantomData,
    }
}

impl<T, F> Processor<T> for FnProcessor<F, T>
where
    T: 'static,
    F: Fn(&T, ThreadContext) -> ProcessResult + Send + Sync + 'static,
{
    fn process(&self, task: &T, context: ThreadContext) -> ProcessResult {
        (self.func)(task, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ThreadKind;

    #[test]
    fn test_fn_processor_forwards() {
        let processor = from_fn(|task: &u32, ctx| {
            if ctx.is_partition_thread() && task % 2 == 0 {
                Ok(())
            } else {
                Err(ProcessError::failed(format!("odd task {task}")))
            }
        });
        let ctx = ThreadContext {
            scheduler_id: 0,
            kind: ThreadKind::Partition,
            index: 0,
        };

        assert!(processor.process(&2, ctx).is_ok());
        assert_eq!(
            processor.process(&3, ctx),
            Err(ProcessError::Failed("odd task 3".to_string()))
        );
    }
}
