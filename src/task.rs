//! Task types carried by the operation queues

use std::fmt::{self, Debug};

/// Trait for units of work the scheduler can route
///
/// Tasks are moved from the submitter into a queue and from there into the
/// single operation thread that processes them; they are never shared.
/// `Debug` is required so a failing task can be identified in the log.
pub trait Task: Send + Debug + 'static {}

// Blanket implementation for all types that meet the requirements
impl<T: Send + Debug + 'static> Task for T {}

/// Element of an operation thread's normal queue
///
/// Control signals travel on the same queue as data so that a thread blocked
/// on an empty queue can be woken by them.
pub enum WorkItem<T> {
    /// A task to hand to the processor
    Task(T),

    /// Wakes the thread so it drains its priority queue
    Wake,

    /// Breaks the thread out of its blocking take during shutdown
    Stop,
}

impl<T: Debug> Debug for WorkItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Task(task) => f.debug_tuple("Task").field(task).finish(),
            WorkItem::Wake => f.write_str("WakeSignal"),
            WorkItem::Stop => f.write_str("PoisonPill"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_debug() {
        assert_eq!(format!("{:?}", WorkItem::Task(7u32)), "Task(7)");
        assert_eq!(format!("{:?}", WorkItem::<u32>::Wake), "WakeSignal");
        assert_eq!(format!("{:?}", WorkItem::<u32>::Stop), "PoisonPill");
    }
}
