//! # Dispatcher pool configuration.
//!
//! [`PoolConfig`] defines how a [`Pool`](crate::Pool) schedules its workers:
//! how many may be in flight at once and how many calls one worker runs
//! before yielding back to the scheduler.
//!
//! # Example
//! ```
//! use ridgeline::PoolConfig;
//!
//! let mut cfg = PoolConfig::default();
//! cfg.workers = 8;
//! cfg.batch = 64;
//!
//! assert_eq!(cfg.workers, 8);
//! ```

/// Configuration for one dispatcher pool.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Maximum number of worker tasks in flight.
    pub workers: usize,
    /// Calls one worker runs before yielding to the scheduler.
    pub batch: u32,
}

impl Default for PoolConfig {
    /// Provides a default configuration:
    /// - `workers = 4`
    /// - `batch = 32`
    fn default() -> Self {
        Self {
            workers: 4,
            batch: 32,
        }
    }
}
