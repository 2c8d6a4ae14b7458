//! # rowsync engine
//!
//! Server-side row-level synchronization for tables edited offline by many
//! clients.
//!
//! This crate provides:
//! - [`VersionAuthority`]: strictly increasing dataETags, unique rowETags
//! - [`Identity`] and the row visibility gate
//! - [`ChangeSetLog`]: the append-only record of committed mutations
//! - [`DiffResolver`]: paginated "what changed since" queries
//! - Conflict detection on stale rowETags
//! - [`TableManager`] and [`DataManager`]: the request-facing API
//!
//! ## Concurrency
//!
//! Writes to one table are serialized by a leased table lock
//! ([`TableLock`]) acquired with bounded retries. Reads take no lock.
//!
//! ## Storage
//!
//! All state lives in a [`rowsync_storage::StorageBackend`]; the engine
//! caches nothing between calls.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod changeset_log;
mod config;
mod conflict;
mod data;
mod diff;
mod engine;
mod error;
mod lock;
mod notify;
mod permissions;
mod record;
mod rows;
mod table;
mod version;

pub use changeset_log::ChangeSetLog;
pub use config::{DelayStrategy, EngineConfig, LockConfig};
pub use conflict::{check_delete, check_write, WriteCheck};
pub use data::DataManager;
pub use diff::DiffResolver;
pub use engine::SyncEngine;
pub use error::{EngineError, EngineResult};
pub use lock::{lock_name, TableLock, TableLockGuard};
pub use notify::{ChannelQueue, NoopQueue, TableChanged, TaskQueue};
pub use permissions::{AclTable, Identity, PermissionResolver, Role, TablePermission};
pub use record::{ChangeSetRecord, LogEntry, StoredRow, TableEntry};
pub use rows::RowStore;
pub use table::{validate_column_name, TableManager};
pub use version::{Clock, ManualClock, SystemClock, VersionAuthority};
