//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Page size used when a request does not name one.
    pub default_fetch_limit: usize,
    /// Largest page size a request may ask for.
    pub max_fetch_limit: usize,
    /// Table lock behaviour.
    pub lock: LockConfig,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            default_fetch_limit: 100,
            max_fetch_limit: 1000,
            lock: LockConfig::default(),
        }
    }

    /// Sets the default fetch limit.
    pub fn with_default_fetch_limit(mut self, limit: usize) -> Self {
        self.default_fetch_limit = limit;
        self
    }

    /// Sets the maximum fetch limit.
    pub fn with_max_fetch_limit(mut self, limit: usize) -> Self {
        self.max_fetch_limit = limit;
        self
    }

    /// Sets the lock configuration.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Resolves the page size for a request.
    ///
    /// Falls back to the default and clamps to `1..=max_fetch_limit`.
    pub fn fetch_limit(&self, requested: Option<usize>) -> usize {
        let max = self.max_fetch_limit.max(1);
        requested
            .unwrap_or(self.default_fetch_limit)
            .clamp(1, max)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Back-off profile for table lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayStrategy {
    /// 200 ms base delay.
    Short,
    /// 1200 ms base delay.
    Medium,
    /// 2500 ms base delay.
    Long,
    /// Caller-chosen base delay.
    Custom(Duration),
}

impl DelayStrategy {
    /// Base delay between attempts.
    pub fn base_delay(&self) -> Duration {
        match self {
            DelayStrategy::Short => Duration::from_millis(200),
            DelayStrategy::Medium => Duration::from_millis(1200),
            DelayStrategy::Long => Duration::from_millis(2500),
            DelayStrategy::Custom(delay) => *delay,
        }
    }
}

/// Configuration for the table lock.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Number of acquisition attempts.
    pub tries: u32,
    /// Back-off profile.
    pub strategy: DelayStrategy,
    /// How long a lock is held before it may be taken over.
    pub lease: Duration,
}

impl LockConfig {
    /// Creates a lock configuration.
    pub fn new(tries: u32, strategy: DelayStrategy) -> Self {
        Self {
            tries,
            strategy,
            lease: Duration::from_secs(60),
        }
    }

    /// Sets the lease duration.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Sets the number of tries.
    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    /// Sets the delay strategy.
    pub fn with_strategy(mut self, strategy: DelayStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new(5, DelayStrategy::Short)
    }
}
