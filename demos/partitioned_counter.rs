//! Partitioned counter demo
//!
//! Each partition keeps a counter that is only ever touched by the partition
//! thread owning it, so the counters need no locking. Priority tasks print a
//! snapshot ahead of the pending increments.

use operation_scheduler::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PARTITIONS: PartitionId = 16;

#[derive(Debug)]
enum CounterOp {
    Increment { partition: PartitionId, by: u64 },
    Report { partition: PartitionId },
    Heartbeat,
}

thread_local! {
    // Per-thread state; partition affinity makes this safe to use unsynchronized
    static COUNTERS: RefCell<HashMap<PartitionId, u64>> = RefCell::new(HashMap::new());
}

fn process(op: &CounterOp, ctx: ThreadContext) -> ProcessResult {
    match op {
        CounterOp::Increment { partition, by } => {
            COUNTERS.with(|c| *c.borrow_mut().entry(*partition).or_default() += by);
            Ok(())
        }
        CounterOp::Report { partition } => {
            let value = COUNTERS.with(|c| c.borrow().get(partition).copied().unwrap_or(0));
            println!("partition {partition:>2} = {value:>4} (on {ctx})");
            Ok(())
        }
        CounterOp::Heartbeat => {
            println!("heartbeat on {ctx}");
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Partitioned Counter Demo ===\n");

    let config = SchedulerConfig::from_env()?
        .with_generic_threads(2)
        .with_partition_threads(4)
        .with_thread_name_prefix("demo");
    let scheduler = OperationScheduler::new(config, from_fn(process))?;
    println!("Started {scheduler}\n");

    for round in 0..100u64 {
        let partition = (round % PARTITIONS as u64) as PartitionId;
        scheduler.execute(CounterOp::Increment { partition, by: round }, partition, false)?;
    }

    // Reports jump ahead of whatever increments are still queued
    for partition in 0..PARTITIONS {
        scheduler.execute(CounterOp::Report { partition }, partition, true)?;
    }
    scheduler.execute(CounterOp::Heartbeat, GENERIC_PARTITION_ID, false)?;

    thread::sleep(Duration::from_millis(200));

    println!(
        "\nqueued: normal={} priority={}",
        scheduler.operation_executor_queue_size(),
        scheduler.priority_operation_executor_queue_size()
    );

    println!("Final values:");
    for partition in 0..PARTITIONS {
        scheduler.execute(CounterOp::Report { partition }, partition, false)?;
    }
    thread::sleep(Duration::from_millis(200));

    scheduler.shutdown();
    println!("\nScheduler stopped after {} tasks", scheduler.processed_task_count());

    Ok(())
}
