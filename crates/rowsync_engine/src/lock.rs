//! Table-scoped lock with bounded retries.
//!
//! Each attempt tries the named lease once; between attempts the caller
//! sleeps `max + rand(0..=base)`, with `max` starting at the base delay of
//! the configured [`DelayStrategy`](crate::DelayStrategy) and doubling after
//! every failed attempt.

use crate::config::LockConfig;
use crate::error::{EngineError, EngineResult};
use rand::Rng;
use rowsync_storage::TaskLock;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Acquires table locks on behalf of the engine.
#[derive(Clone)]
pub struct TableLock {
    locks: Arc<dyn TaskLock>,
    config: LockConfig,
}

impl TableLock {
    /// Creates a lock template over `locks`.
    pub fn new(locks: Arc<dyn TaskLock>, config: LockConfig) -> Self {
        Self { locks, config }
    }

    /// Acquires the lock for `table_id`.
    ///
    /// # Errors
    ///
    /// Returns `TaskLockTimeout` when every attempt found the lock held.
    pub fn acquire(&self, table_id: &str) -> EngineResult<TableLockGuard> {
        let name = lock_name(table_id);
        let owner = Uuid::new_v4().to_string();
        let base = self.config.strategy.base_delay();
        let mut max = base;

        for attempt in 1..=self.config.tries {
            if self.locks.try_acquire(&name, &owner, self.config.lease)? {
                tracing::trace!(table = table_id, attempt, "table lock acquired");
                return Ok(TableLockGuard {
                    locks: Arc::clone(&self.locks),
                    name,
                    owner,
                });
            }
            if attempt == self.config.tries {
                break;
            }
            let delay = max + jitter(base);
            tracing::warn!(
                table = table_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "table lock busy, backing off"
            );
            std::thread::sleep(delay);
            max = max.saturating_mul(2);
        }

        Err(EngineError::TaskLockTimeout {
            table_id: table_id.to_string(),
            tries: self.config.tries,
        })
    }
}

impl std::fmt::Debug for TableLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLock")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Holds a table lock; releases it on drop.
pub struct TableLockGuard {
    locks: Arc<dyn TaskLock>,
    name: String,
    owner: String,
}

impl TableLockGuard {
    /// Name of the held lock.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TableLockGuard {
    fn drop(&mut self) {
        match self.locks.release(&self.name, &self.owner) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(lock = %self.name, "lease expired before release"),
            Err(e) => tracing::warn!(lock = %self.name, error = %e, "failed to release lock"),
        }
    }
}

/// Name of the lock guarding `table_id`.
pub fn lock_name(table_id: &str) -> String {
    format!("table:{table_id}")
}

fn jitter(base: Duration) -> Duration {
    let millis = base.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayStrategy;
    use rowsync_storage::InMemoryLockTable;

    fn fast_config(tries: u32) -> LockConfig {
        LockConfig::new(tries, DelayStrategy::Custom(Duration::from_millis(1)))
    }

    #[test]
    fn acquire_and_release() {
        let table = Arc::new(InMemoryLockTable::new());
        let lock = TableLock::new(table.clone(), fast_config(3));
        {
            let guard = lock.acquire("t1").unwrap();
            assert_eq!(guard.name(), "table:t1");
            assert!(table.holder("table:t1").is_some());
        }
        assert!(table.holder("table:t1").is_none());
    }

    #[test]
    fn contended_lock_times_out() {
        let table = Arc::new(InMemoryLockTable::new());
        let lock = TableLock::new(table.clone(), fast_config(3));
        let _held = lock.acquire("t1").unwrap();
        match lock.acquire("t1") {
            Err(EngineError::TaskLockTimeout { table_id, tries }) => {
                assert_eq!(table_id, "t1");
                assert_eq!(tries, 3);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("lock acquired twice"),
        }
    }

    #[test]
    fn tables_lock_independently() {
        let table = Arc::new(InMemoryLockTable::new());
        let lock = TableLock::new(table, fast_config(1));
        let _a = lock.acquire("a").unwrap();
        let _b = lock.acquire("b").unwrap();
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let table = Arc::new(InMemoryLockTable::new());
        let lock = TableLock::new(
            table.clone(),
            fast_config(5).with_lease(Duration::from_millis(5)),
        );
        let stale = lock.acquire("t1").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let fresh = lock.acquire("t1").unwrap();
        drop(stale);
        assert!(table.holder("table:t1").is_some());
        drop(fresh);
    }
}
