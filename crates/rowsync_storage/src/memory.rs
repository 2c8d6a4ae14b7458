//! In-memory storage backend for testing.

use crate::backend::{KeyRange, Precondition, StorageBackend, Versioned};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Ordered records of every space. Shared by the in-memory and journal
/// backends so both apply preconditions identically.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    spaces: HashMap<String, BTreeMap<String, Versioned>>,
}

impl Keyspace {
    pub(crate) fn get(&self, space: &str, key: &str) -> Option<Versioned> {
        self.spaces.get(space).and_then(|s| s.get(key)).cloned()
    }

    pub(crate) fn current_version(&self, space: &str, key: &str) -> Option<u64> {
        self.spaces
            .get(space)
            .and_then(|s| s.get(key))
            .map(|v| v.version)
    }

    /// Checks `precondition` and returns the version the put would assign.
    pub(crate) fn next_version(
        &self,
        space: &str,
        key: &str,
        precondition: Precondition,
    ) -> StorageResult<u64> {
        let current = self.current_version(space, key);
        if !precondition.holds(current) {
            return Err(StorageError::PreconditionFailed {
                space: space.to_string(),
                key: key.to_string(),
                expected: precondition.to_string(),
                actual: current,
            });
        }
        Ok(current.unwrap_or(0) + 1)
    }

    pub(crate) fn insert(&mut self, space: &str, key: &str, versioned: Versioned) {
        self.spaces
            .entry(space.to_string())
            .or_default()
            .insert(key.to_string(), versioned);
    }

    pub(crate) fn remove(&mut self, space: &str, key: &str) -> bool {
        self.spaces
            .get_mut(space)
            .map(|s| s.remove(key).is_some())
            .unwrap_or(false)
    }

    pub(crate) fn scan(
        &self,
        space: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> Vec<(String, Versioned)> {
        let Some(records) = self.spaces.get(space) else {
            return Vec::new();
        };
        let start: Bound<&str> = match &range.start {
            Bound::Included(s) => Bound::Included(s.as_str()),
            Bound::Excluded(s) => Bound::Excluded(s.as_str()),
            Bound::Unbounded => Bound::Unbounded,
        };
        records
            .range::<str, _>((start, Bound::Unbounded))
            .take_while(|(k, _)| range.below_end(k))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.spaces.values().map(BTreeMap::len).sum()
    }
}

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral servers that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use rowsync_storage::{InMemoryBackend, Precondition, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.put("tables", "t1", b"entry", Precondition::Any).unwrap();
/// assert_eq!(backend.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Keyspace>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records across all spaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all data from the backend.
    pub fn clear(&self) {
        *self.data.write() = Keyspace::default();
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, space: &str, key: &str) -> StorageResult<Option<Versioned>> {
        Ok(self.data.read().get(space, key))
    }

    fn put(
        &self,
        space: &str,
        key: &str,
        value: &[u8],
        precondition: Precondition,
    ) -> StorageResult<u64> {
        let mut data = self.data.write();
        let version = data.next_version(space, key, precondition)?;
        data.insert(
            space,
            key,
            Versioned {
                version,
                value: value.to_vec(),
            },
        );
        Ok(version)
    }

    fn delete(&self, space: &str, key: &str) -> StorageResult<bool> {
        Ok(self.data.write().remove(space, key))
    }

    fn scan(
        &self,
        space: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> StorageResult<Vec<(String, Versioned)>> {
        Ok(self.data.read().scan(space, range, limit))
    }

    fn flush(&self) -> StorageResult<()> {
        // In-memory backend has no pending writes
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert!(backend.get("rows", "missing").unwrap().is_none());
    }

    #[test]
    fn memory_put_bumps_version() {
        let backend = InMemoryBackend::new();

        let v1 = backend.put("rows", "r1", b"a", Precondition::Any).unwrap();
        let v2 = backend.put("rows", "r1", b"b", Precondition::Any).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);

        let stored = backend.get("rows", "r1").unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.value, b"b");
    }

    #[test]
    fn memory_put_absent_rejects_existing() {
        let backend = InMemoryBackend::new();
        backend.put("rows", "r1", b"a", Precondition::Absent).unwrap();

        let result = backend.put("rows", "r1", b"b", Precondition::Absent);
        assert!(matches!(
            result,
            Err(StorageError::PreconditionFailed { actual: Some(1), .. })
        ));
    }

    #[test]
    fn memory_put_version_compare_and_set() {
        let backend = InMemoryBackend::new();
        let v1 = backend.put("rows", "r1", b"a", Precondition::Any).unwrap();

        assert!(backend
            .put("rows", "r1", b"b", Precondition::Version(v1 + 1))
            .unwrap_err()
            .is_precondition_failure());
        assert_eq!(
            backend
                .put("rows", "r1", b"b", Precondition::Version(v1))
                .unwrap(),
            2
        );
    }

    #[test]
    fn memory_spaces_are_isolated() {
        let backend = InMemoryBackend::new();
        backend.put("a", "k", b"1", Precondition::Any).unwrap();
        backend.put("b", "k", b"2", Precondition::Any).unwrap();

        assert_eq!(backend.get("a", "k").unwrap().unwrap().value, b"1");
        assert_eq!(backend.get("b", "k").unwrap().unwrap().value, b"2");
        assert_eq!(backend.scan("a", &KeyRange::all(), None).unwrap().len(), 1);
    }

    #[test]
    fn memory_scan_is_ordered_and_limited() {
        let backend = InMemoryBackend::new();
        for key in ["c", "a", "d", "b"] {
            backend.put("s", key, key.as_bytes(), Precondition::Any).unwrap();
        }

        let keys: Vec<_> = backend
            .scan("s", &KeyRange::all(), Some(3))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let keys: Vec<_> = backend
            .scan("s", &KeyRange::after("b"), None)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["c", "d"]);
    }

    #[test]
    fn memory_scan_prefix() {
        let backend = InMemoryBackend::new();
        backend.put("s", "x/1", b"", Precondition::Any).unwrap();
        backend.put("s", "x/2", b"", Precondition::Any).unwrap();
        backend.put("s", "y/1", b"", Precondition::Any).unwrap();

        let found = backend.scan("s", &KeyRange::prefix("x/"), None).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn memory_delete() {
        let backend = InMemoryBackend::new();
        backend.put("s", "k", b"v", Precondition::Any).unwrap();

        assert!(backend.delete("s", "k").unwrap());
        assert!(!backend.delete("s", "k").unwrap());
        assert!(backend.get("s", "k").unwrap().is_none());

        // Re-created keys restart their version history.
        assert_eq!(backend.put("s", "k", b"v", Precondition::Absent).unwrap(), 1);
    }

    proptest::proptest! {
        #[test]
        fn memory_scan_matches_sorted_keys(keys in proptest::collection::btree_set("[a-z]{1,6}", 0..40)) {
            let backend = InMemoryBackend::new();
            for key in keys.iter().rev() {
                backend.put("s", key, b"", Precondition::Any).unwrap();
            }
            let scanned: Vec<String> = backend
                .scan("s", &KeyRange::all(), None)
                .unwrap()
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            let expected: Vec<String> = keys.into_iter().collect();
            proptest::prop_assert_eq!(scanned, expected);
        }
    }

    #[test]
    fn memory_clear() {
        let backend = InMemoryBackend::new();
        backend.put("s", "k", b"v", Precondition::Any).unwrap();
        backend.clear();
        assert!(backend.is_empty());
    }
}
