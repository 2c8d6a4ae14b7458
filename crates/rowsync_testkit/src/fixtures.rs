//! Test fixtures and engine helpers.
//!
//! Provides engines over in-memory or journal-backed storage with a
//! controllable clock and fast lock back-off.

use chrono::{TimeZone, Utc};
use rowsync_engine::{
    DataManager, DelayStrategy, EngineConfig, Identity, LockConfig, ManualClock, Role, SyncEngine,
};
use rowsync_protocol::ColumnDefinition;
use rowsync_storage::{FileBackend, InMemoryBackend, InMemoryLockTable, StorageBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Table created by [`TestEngine::with_people`].
pub const PEOPLE: &str = "people";

/// Engine configuration for tests: 1 ms lock back-off, generous retries.
pub fn test_config() -> EngineConfig {
    EngineConfig::new().with_lock(LockConfig::new(
        8,
        DelayStrategy::Custom(Duration::from_millis(1)),
    ))
}

/// An identity holding every permission.
pub fn admin() -> Identity {
    Identity::new("admin").with_role(Role::Administer)
}

/// An identity that synchronizes rows its scopes grant.
pub fn user(name: &str) -> Identity {
    Identity::new(name).with_role(Role::Synchronize)
}

/// A test engine with automatic cleanup.
pub struct TestEngine {
    /// The engine instance.
    pub engine: SyncEngine,
    /// Clock driving dataETag minting.
    pub clock: Arc<ManualClock>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an engine over in-memory storage.
    pub fn memory() -> Self {
        Self::build(Arc::new(InMemoryBackend::new()), None)
    }

    /// Creates an engine over a journal in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FileBackend::open(&temp_dir.path().join("rowsync.journal"))
            .expect("Failed to open journal")
            .without_sync_on_write();
        Self::build(Arc::new(backend), Some(temp_dir))
    }

    fn build(backend: Arc<dyn StorageBackend>, temp_dir: Option<TempDir>) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .expect("valid start time"),
        ));
        let engine = SyncEngine::new(backend, Arc::new(InMemoryLockTable::new()))
            .with_config(test_config())
            .with_clock(clock.clone());
        Self {
            engine,
            clock,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the journal path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|d| d.path().join("rowsync.journal"))
    }

    /// Creates a table with string columns.
    pub fn with_table(self, table_id: &str, columns: &[&str]) -> Self {
        self.engine
            .tables(&admin())
            .create_table(
                table_id,
                columns.iter().map(|c| ColumnDefinition::new(*c)).collect(),
            )
            .expect("Failed to create table");
        self
    }

    /// Creates the [`PEOPLE`] table with `name` and `age` columns.
    pub fn with_people(self) -> Self {
        self.with_table(PEOPLE, &["name", "age"])
    }

    /// Row access to `table_id` for `identity`.
    pub fn data(&self, table_id: &str, identity: Identity) -> DataManager<'_> {
        self.engine
            .data(table_id, identity)
            .expect("Failed to open table")
    }
}

impl std::ops::Deref for TestEngine {
    type Target = SyncEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test against an in-memory engine holding the [`PEOPLE`] table.
///
/// # Example
///
/// ```rust
/// use rowsync_testkit::{admin, with_people, PEOPLE};
/// use rowsync_protocol::Row;
///
/// with_people(|engine| {
///     let data = engine.data(PEOPLE, admin());
///     data.insert_or_update_row(Row::new("r1")).unwrap();
/// });
/// ```
pub fn with_people<F, R>(f: F) -> R
where
    F: FnOnce(&TestEngine) -> R,
{
    let engine = TestEngine::memory().with_people();
    f(&engine)
}

/// Runs a test against a journal-backed engine holding the [`PEOPLE`] table.
pub fn with_file_people<F, R>(f: F) -> R
where
    F: FnOnce(&TestEngine) -> R,
{
    let engine = TestEngine::file().with_people();
    f(&engine)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use rowsync_protocol::Row;

    /// Creates an engine whose [`PEOPLE`] table holds `count` rows, each
    /// committed in its own changeset.
    pub fn populated(count: usize) -> TestEngine {
        let engine = TestEngine::memory().with_people();
        {
            let data = engine.data(PEOPLE, admin());
            for i in 0..count {
                data.insert_or_update_row(
                    Row::new(format!("row{i:05}")).with_value("name", format!("person {i}")),
                )
                .expect("Failed to insert row");
            }
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_engine_has_no_path() {
        let engine = TestEngine::memory();
        assert!(engine.path().is_none());
    }

    #[test]
    fn file_engine_has_path() {
        let engine = TestEngine::file().with_people();
        assert!(engine.path().unwrap().exists());
    }

    #[test]
    fn populated_scenario() {
        let engine = scenarios::populated(12);
        let data = engine.data(PEOPLE, admin());
        let list = data.change_sets_since(None, None).unwrap();
        assert_eq!(list.data_etags.len(), 12);
    }
}
