//! Storage backend trait definition.

use crate::error::StorageResult;
use std::fmt;
use std::ops::Bound;

/// A stored value together with its record version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Record version, starting at 1 and bumped on every put.
    pub version: u64,
    /// Opaque value bytes.
    pub value: Vec<u8>,
}

/// Condition a put must satisfy before it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional write.
    Any,
    /// The key must not exist.
    Absent,
    /// The key must exist with exactly this version.
    Version(u64),
}

impl Precondition {
    /// Checks the precondition against the currently stored version.
    pub fn holds(&self, current: Option<u64>) -> bool {
        match self {
            Precondition::Any => true,
            Precondition::Absent => current.is_none(),
            Precondition::Version(v) => current == Some(*v),
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Any => write!(f, "any"),
            Precondition::Absent => write!(f, "absent"),
            Precondition::Version(v) => write!(f, "version {v}"),
        }
    }
}

/// An ordered key range within one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound.
    pub start: Bound<String>,
    /// Upper bound.
    pub end: Bound<String>,
}

impl KeyRange {
    /// Every key in the space.
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Keys strictly greater than `key`.
    pub fn after(key: impl Into<String>) -> Self {
        Self {
            start: Bound::Excluded(key.into()),
            end: Bound::Unbounded,
        }
    }

    /// Keys that start with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let end = match prefix_successor(&prefix) {
            Some(next) => Bound::Excluded(next),
            None => Bound::Unbounded,
        };
        Self {
            start: Bound::Included(prefix),
            end,
        }
    }

    /// Restricts the lower bound to keys strictly greater than `key`,
    /// keeping whichever lower bound is tighter.
    pub fn starting_after(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        let tighter = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(s) => key.as_str() >= s.as_str(),
            Bound::Excluded(s) => key.as_str() > s.as_str(),
        };
        if tighter {
            self.start = Bound::Excluded(key);
        }
        self
    }

    /// Returns true if `key` falls below the upper bound.
    pub fn below_end(&self, key: &str) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(e) => key <= e.as_str(),
            Bound::Excluded(e) => key < e.as_str(),
        }
    }

    /// Returns true if `key` falls above the lower bound.
    pub fn above_start(&self, key: &str) -> bool {
        match &self.start {
            Bound::Unbounded => true,
            Bound::Included(s) => key >= s.as_str(),
            Bound::Excluded(s) => key > s.as_str(),
        }
    }

    /// Returns true if `key` is inside the range.
    pub fn contains(&self, key: &str) -> bool {
        self.above_start(key) && self.below_end(key)
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// A versioned key-value store used by the sync engine.
///
/// Keys live in named spaces (one per table and record kind). Within a
/// space, scans return keys in ascending byte order. Every successful put
/// bumps the record version, which callers use for compare-and-set.
///
/// # Invariants
///
/// - `put` applies only if its [`Precondition`] holds
/// - `get` after a successful `put` returns the value and the returned version
/// - `scan` returns keys in ascending order, never more than `limit`
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, space: &str, key: &str) -> StorageResult<Option<Versioned>>;

    /// Writes `value` under `key` if `precondition` holds.
    ///
    /// Returns the new record version.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::PreconditionFailed`] if the stored
    /// version does not satisfy the precondition.
    fn put(
        &self,
        space: &str,
        key: &str,
        value: &[u8],
        precondition: Precondition,
    ) -> StorageResult<u64>;

    /// Removes `key`. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be recorded.
    fn delete(&self, space: &str, key: &str) -> StorageResult<bool>;

    /// Returns up to `limit` records whose keys fall in `range`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn scan(
        &self,
        space: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> StorageResult<Vec<(String, Versioned)>>;

    /// Ensures all completed writes are durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;
}
