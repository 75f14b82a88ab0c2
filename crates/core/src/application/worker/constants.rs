// Coordination constants (no magic values)
use std::time::Duration;

/// Poll interval while waiting for a reshard to settle (100ms)
pub const SHARDING_SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval while the leader waits for running items to drain (100ms)
pub const RUNNING_DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Base delay between election attempts while no leader is known (100ms)
pub const ELECTION_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound of the random jitter added to each election retry
pub const ELECTION_RETRY_JITTER_MS: u64 = 50;

/// Latch holders are re-checked at least this often in case a release
/// notification was missed (500ms)
pub const LATCH_RECHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Barrier waiters fall back to polling at this interval when the watch
/// stream closes (100ms)
pub const BARRIER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound of the ready queue
pub const DEFAULT_READY_QUEUE_MAX_DEPTH: usize = 10_000;

/// Default worker pool size multiplier over the CPU count
pub const DEFAULT_POOL_SIZE_PER_CPU: usize = 2;

/// How long shutdown waits for an in-flight cycle (5s)
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Time a timed-out script gets between SIGTERM and SIGKILL (2s)
pub const SCRIPT_TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a terminated script to exit (100ms)
pub const SCRIPT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
