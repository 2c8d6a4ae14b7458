//! The engine handle shared by every request.

use crate::config::EngineConfig;
use crate::data::DataManager;
use crate::error::{EngineError, EngineResult};
use crate::lock::TableLock;
use crate::notify::{NoopQueue, TaskQueue};
use crate::permissions::Identity;
use crate::record::{decode, TableEntry, TABLES_SPACE};
use crate::table::TableManager;
use crate::version::{Clock, VersionAuthority};
use rowsync_storage::{StorageBackend, TaskLock};
use std::sync::Arc;

/// Row-level synchronization engine.
///
/// Holds no row or changeset state of its own: every call reads from and
/// writes to the storage backend. Cloning is cheap.
///
/// # Example
///
/// ```rust
/// use rowsync_engine::{Identity, Role, SyncEngine};
/// use rowsync_protocol::{ColumnDefinition, Row};
/// use rowsync_storage::{InMemoryBackend, InMemoryLockTable};
/// use std::sync::Arc;
///
/// let engine = SyncEngine::new(
///     Arc::new(InMemoryBackend::new()),
///     Arc::new(InMemoryLockTable::new()),
/// );
/// let admin = Identity::new("admin").with_role(Role::Administer);
/// engine
///     .tables(&admin)
///     .create_table("people", vec![ColumnDefinition::new("name")])
///     .unwrap();
///
/// let data = engine.data("people", admin).unwrap();
/// let row = data
///     .insert_or_update_row(Row::new("r1").with_value("name", "Ada"))
///     .unwrap();
/// assert!(row.row_etag.is_some());
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    backend: Arc<dyn StorageBackend>,
    locks: Arc<dyn TaskLock>,
    lock: TableLock,
    versions: VersionAuthority,
    queue: Arc<dyn TaskQueue>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Creates an engine with default configuration, the system clock and
    /// no change notification.
    pub fn new(backend: Arc<dyn StorageBackend>, locks: Arc<dyn TaskLock>) -> Self {
        let config = EngineConfig::default();
        Self {
            lock: TableLock::new(Arc::clone(&locks), config.lock.clone()),
            backend,
            locks,
            versions: VersionAuthority::system(),
            queue: Arc::new(NoopQueue),
            config,
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.lock = TableLock::new(Arc::clone(&self.locks), config.lock.clone());
        self.config = config;
        self
    }

    /// Sets the clock used to mint dataETags.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.versions = VersionAuthority::new(clock);
        self
    }

    /// Sets the change notification queue.
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Table administration for `identity`.
    pub fn tables<'a>(&'a self, identity: &'a Identity) -> TableManager<'a> {
        TableManager::new(self, identity)
    }

    /// Row access to `table_id` for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the table does not exist.
    pub fn data(&self, table_id: &str, identity: Identity) -> EngineResult<DataManager<'_>> {
        self.load_table(table_id)?;
        Ok(DataManager::new(self, table_id, identity))
    }

    pub(crate) fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    pub(crate) fn lock(&self) -> &TableLock {
        &self.lock
    }

    pub(crate) fn versions(&self) -> &VersionAuthority {
        &self.versions
    }

    pub(crate) fn queue(&self) -> &dyn TaskQueue {
        self.queue.as_ref()
    }

    /// Reads a table entry and its record version.
    pub(crate) fn load_table(&self, table_id: &str) -> EngineResult<(TableEntry, u64)> {
        let versioned = self
            .backend
            .get(TABLES_SPACE, table_id)?
            .ok_or_else(|| EngineError::NotFound(format!("table {table_id}")))?;
        Ok((decode(&versioned.value)?, versioned.version))
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
