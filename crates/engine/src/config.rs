use std::time::Duration;

use crate::retry::RetryStrategy;

/// Job engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Jobs allowed in `Running` at once across all rules.
    pub max_concurrent_jobs: usize,
    /// Attempts a job gets before it is `Exhausted`, counting the first.
    pub max_attempts: u32,
    /// Backoff before an automatic retry.
    pub retry_strategy: RetryStrategy,
    /// Upper bound on one attempt, enumeration included.
    pub attempt_timeout: Duration,
    /// How long a cancel or pause waits for the worker to unwind before the
    /// engine aborts it.
    pub cancel_grace: Duration,
    /// Compare the adapter's write receipt with what was sent.
    pub verify_integrity: bool,
    /// Weight of the newest throughput sample in the ETA average.
    pub ewma_alpha: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_attempts: 3,
            retry_strategy: RetryStrategy::default(),
            attempt_timeout: Duration::from_secs(300),
            cancel_grace: Duration::from_secs(10),
            verify_integrity: true,
            ewma_alpha: 0.3,
        }
    }
}

/// Scheduler clock settings.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Polling interval. Affects latency, not which runs happen.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
        }
    }
}
