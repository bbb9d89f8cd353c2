// src/config.rs

//! Pool sizing parameters and their validation.

use std::time::Duration;

use crate::errors::{PoolError, Result};

/// Sizing and behaviour parameters for a [`ProcessPool`](crate::ProcessPool).
///
/// - `min_size`: number of processes the pool keeps alive at all times.
/// - `max_size`: hard upper bound on concurrent processes.
/// - `reserve_size`: number of idle (ready) processes to keep warm while the
///   pool is not saturated.
/// - `keep_alive`: how long a surplus process may sit idle before it is
///   retired. `None` (or a zero duration) means processes never time out.
/// - `verbose`: whether pool-management events (process spawn/retire,
///   submission start/complete/cancel, termination path) are logged. When
///   false, the pool emits no management events at all.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub reserve_size: usize,
    pub keep_alive: Option<Duration>,
    pub verbose: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 1,
            reserve_size: 0,
            keep_alive: None,
            verbose: false,
        }
    }
}

impl PoolConfig {
    /// Create a config with the given sizes, no keep-alive, non-verbose.
    pub fn new(min_size: usize, max_size: usize, reserve_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            reserve_size,
            ..Self::default()
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check the relational constraints between the sizing parameters.
    ///
    /// Violations are programmer errors; pool construction refuses them with
    /// [`PoolError::InvalidConfiguration`].
    pub fn validate(&self) -> Result<()> {
        if self.max_size < 1 || self.max_size < self.min_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "the maximum pool size has to be at least 1 and at least as great as the \
                 minimum pool size (min: {}, max: {})",
                self.min_size, self.max_size
            )));
        }
        if self.reserve_size >= self.max_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "the reserve has to be less than the maximum pool size (reserve: {}, max: {})",
                self.reserve_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Fold `Some(0)` keep-alive into `None` so the rest of the pool only
    /// ever sees a meaningful deadline.
    pub(crate) fn normalized(mut self) -> Self {
        if self.keep_alive == Some(Duration::ZERO) {
            self.keep_alive = None;
        }
        self
    }

    /// Number of processes spawned at construction time.
    pub(crate) fn initial_size(&self) -> usize {
        self.min_size.max(self.reserve_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_size() {
        let err = PoolConfig::new(0, 0, 0).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let err = PoolConfig::new(10, 5, 0).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_reserve_equal_to_max() {
        let err = PoolConfig::new(10, 12, 12).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_reserve_greater_than_max() {
        let err = PoolConfig::new(10, 12, 15).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    }

    #[test]
    fn accepts_zero_reserve() {
        assert!(PoolConfig::new(0, 100, 0).validate().is_ok());
    }

    #[test]
    fn zero_keep_alive_normalizes_to_none() {
        let cfg = PoolConfig::new(1, 2, 0)
            .with_keep_alive(Duration::ZERO)
            .normalized();
        assert_eq!(cfg.keep_alive, None);

        let cfg = PoolConfig::new(1, 2, 0)
            .with_keep_alive(Duration::from_secs(15))
            .normalized();
        assert_eq!(cfg.keep_alive, Some(Duration::from_secs(15)));
    }

    #[test]
    fn initial_size_is_max_of_min_and_reserve() {
        assert_eq!(PoolConfig::new(50, 150, 20).initial_size(), 50);
        assert_eq!(PoolConfig::new(10, 150, 20).initial_size(), 20);
        assert_eq!(PoolConfig::new(0, 100, 0).initial_size(), 0);
    }
}
