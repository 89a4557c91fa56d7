//! Scheduler configuration
//!
//! Both pools are sized once, at construction. A thread count that is unset
//! (or zero) falls back to twice the hardware parallelism.

use crate::error::{Error, Result};
use std::time::Duration;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// How long `shutdown` waits for each operation thread to exit
pub const TERMINATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Environment variable overriding the generic thread count
pub const ENV_GENERIC_THREAD_COUNT: &str = "OPERATION_SCHEDULER_GENERIC_THREAD_COUNT";

/// Environment variable overriding the partition thread count
pub const ENV_PARTITION_THREAD_COUNT: &str = "OPERATION_SCHEDULER_PARTITION_THREAD_COUNT";

/// Environment variable overriding the thread name prefix
pub const ENV_THREAD_NAME_PREFIX: &str = "OPERATION_SCHEDULER_THREAD_NAME_PREFIX";

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct SchedulerConfig {
    /// Threads in the generic pool (None or 0 = 2 x hardware parallelism)
    pub generic_thread_count: Option<usize>,

    /// Threads in the partition pool (None or 0 = 2 x hardware parallelism)
    pub partition_thread_count: Option<usize>,

    /// Hardware parallelism hint (None = number of logical cores)
    pub hardware_parallelism: Option<usize>,

    /// Prefix for operation thread names
    pub thread_name_prefix: String,

    /// Per-thread wait during shutdown
    pub termination_timeout: Duration,

    /// Whether to pin operation threads to cores
    pub enable_cpu_affinity: bool,

    /// Stack size for operation threads (None = default)
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            generic_thread_count: None,
            partition_thread_count: None,
            hardware_parallelism: None,
            thread_name_prefix: "scheduler".to_string(),
            termination_timeout: TERMINATION_TIMEOUT,
            enable_cpu_affinity: false,
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a new scheduler configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from defaults overlaid with environment overrides
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay overrides looked up through `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_GENERIC_THREAD_COUNT) {
            self.generic_thread_count = Some(parse_count(ENV_GENERIC_THREAD_COUNT, &raw)?);
        }
        if let Some(raw) = lookup(ENV_PARTITION_THREAD_COUNT) {
            self.partition_thread_count = Some(parse_count(ENV_PARTITION_THREAD_COUNT, &raw)?);
        }
        if let Some(prefix) = lookup(ENV_THREAD_NAME_PREFIX) {
            self.thread_name_prefix = prefix;
        }
        Ok(self)
    }

    /// Set the generic thread count
    pub fn with_generic_threads(mut self, count: usize) -> Self {
        self.generic_thread_count = Some(count);
        self
    }

    /// Set the partition thread count
    pub fn with_partition_threads(mut self, count: usize) -> Self {
        self.partition_thread_count = Some(count);
        self
    }

    /// Set the hardware parallelism hint
    pub fn with_hardware_parallelism(mut self, cores: usize) -> Self {
        self.hardware_parallelism = Some(cores);
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the per-thread termination timeout
    pub fn with_termination_timeout(mut self, timeout: Duration) -> Self {
        self.termination_timeout = timeout;
        self
    }

    /// Enable CPU affinity pinning
    pub fn with_cpu_affinity(mut self, enable: bool) -> Self {
        self.enable_cpu_affinity = enable;
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.termination_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "termination timeout must be non-zero".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "thread name prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Hardware parallelism actually used for defaults
    pub fn effective_parallelism(&self) -> usize {
        match self.hardware_parallelism {
            Some(cores) if cores > 0 => cores,
            _ => num_cpus::get(),
        }
    }

    /// Resolved size of the generic pool
    pub fn resolved_generic_threads(&self) -> usize {
        resolve(self.generic_thread_count, self.effective_parallelism())
    }

    /// Resolved size of the partition pool
    pub fn resolved_partition_threads(&self) -> usize {
        resolve(self.partition_thread_count, self.effective_parallelism())
    }
}

fn resolve(configured: Option<usize>, parallelism: usize) -> usize {
    match configured {
        Some(count) if count > 0 => count,
        _ => parallelism * 2,
    }
}

// Negative counts are accepted and mean "unset", same as zero.
fn parse_count(key: &str, raw: &str) -> Result<usize> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key}: expected an integer, got {raw:?}")))?;
    Ok(usize::try_from(value).unwrap_or(0))
}
