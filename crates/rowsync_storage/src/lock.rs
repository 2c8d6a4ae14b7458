//! Named task locks.

use crate::error::StorageResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A table of named, leased mutual-exclusion locks.
///
/// A lock is held by an `owner` token until it is released or its lease
/// expires. An expired lease may be taken over by any caller, which keeps a
/// crashed holder from wedging the lock forever.
///
/// Implementations only answer "did I get it right now"; waiting and
/// back-off belong to the caller.
pub trait TaskLock: Send + Sync {
    /// Tries to take `name` for `owner` with the given lease.
    ///
    /// Returns true if the lock is now held by `owner`. Re-acquiring a lock
    /// already held by the same owner renews its lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table cannot be read or written.
    fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> StorageResult<bool>;

    /// Releases `name` if it is held by `owner`.
    ///
    /// Returns true if the lock was released.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table cannot be written.
    fn release(&self, name: &str, owner: &str) -> StorageResult<bool>;
}

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// Process-local lock table.
#[derive(Debug, Default)]
pub struct InMemoryLockTable {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current holder of `name`, ignoring expired leases.
    #[must_use]
    pub fn holder(&self, name: &str) -> Option<String> {
        let leases = self.leases.lock();
        leases
            .get(name)
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.owner.clone())
    }
}

impl TaskLock for InMemoryLockTable {
    fn try_acquire(&self, name: &str, owner: &str, lease: Duration) -> StorageResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        let free = match leases.get(name) {
            None => true,
            Some(current) => current.owner == owner || current.expires_at <= now,
        };
        if free {
            leases.insert(
                name.to_string(),
                Lease {
                    owner: owner.to_string(),
                    expires_at: now + lease,
                },
            );
        }
        Ok(free)
    }

    fn release(&self, name: &str, owner: &str) -> StorageResult<bool> {
        let mut leases = self.leases.lock();
        match leases.get(name) {
            Some(current) if current.owner == owner => {
                leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
