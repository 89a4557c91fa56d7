//! # Operation Scheduler
//!
//! An in-process scheduler that routes operations onto fixed pools of
//! operation threads, with strict partition affinity.
//!
//! ## Key Features
//!
//! - **Partition affinity**: all operations for a partition run on the same
//!   dedicated thread, in submission order
//! - **Generic pool**: partition-independent operations are spread randomly
//!   over a separate pool
//! - **Priority lane**: urgent operations jump ahead of a thread's backlog
//!   without disturbing its normal queue
//! - **Failure isolation**: a failing or panicking task never takes its thread
//!   down
//! - **Bounded shutdown**: every thread gets a fixed time to exit
//!
//! ## Architecture
//!
//! ```text
//!              execute(task, partition_id, priority)
//!                              │
//!              ┌───────────────┴───────────────┐
//!     partition_id < 0                 partition_id >= 0
//!        (random)                   (partition_id mod N)
//!              │                               │
//!              ▼                               ▼
//!   ┌─────────────────────┐        ┌─────────────────────┐
//!   │  generic thread i   │        │ partition thread j  │
//!   │ ┌───────┐ ┌───────┐ │        │ ┌───────┐ ┌───────┐ │
//!   │ │normal │ │prio   │ │        │ │normal │ │prio   │ │
//!   │ └───────┘ └───────┘ │        │ └───────┘ └───────┘ │
//!   └──────────┬──────────┘        └──────────┬──────────┘
//!              └──────────► Processor ◄───────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use operation_scheduler::prelude::*;
//!
//! let scheduler = OperationScheduler::new(
//!     SchedulerConfig::new().with_partition_threads(4),
//!     from_fn(|key: &String, ctx: ThreadContext| {
//!         println!("{key} on {ctx}");
//!         Ok(())
//!     }),
//! )?;
//!
//! scheduler.execute("user-17".to_string(), 17, false)?;
//! scheduler.shutdown();
//! # Ok::<(), operation_scheduler::Error>(())
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod context;
pub mod error;
pub mod fatal;
pub mod processor;
pub mod queue;
pub mod routing;
pub mod scheduler;
pub mod task;
pub mod worker;

// Re-exports
pub use config::{SchedulerConfig, TERMINATION_TIMEOUT};
pub use context::{SchedulerId, ThreadContext, ThreadKind};
pub use error::{Error, Result};
pub use processor::{from_fn, ProcessError, ProcessResult, Processor};
pub use queue::QueueCounters;
pub use routing::{PartitionId, RandomSelector, ThreadSelector, GENERIC_PARTITION_ID};
pub use scheduler::OperationScheduler;
pub use task::Task;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::context::{ThreadContext, ThreadKind};
    pub use crate::error::{Error, Result};
    pub use crate::processor::{from_fn, ProcessError, ProcessResult, Processor};
    pub use crate::routing::{PartitionId, GENERIC_PARTITION_ID};
    pub use crate::scheduler::OperationScheduler;
}
