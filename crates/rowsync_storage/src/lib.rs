//! # rowsync storage
//!
//! Storage interfaces and implementations for the rowsync engine.
//!
//! The engine never talks to a concrete datastore. It needs two narrow
//! capabilities, each expressed as a trait here:
//!
//! - [`StorageBackend`]: a versioned key-value store partitioned into named
//!   spaces, with ordered range scans and compare-and-set puts.
//! - [`TaskLock`]: a table of named, leased mutual-exclusion locks.
//!
//! Values are **opaque bytes**. The engine owns every record format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral servers
//! - [`FileBackend`] - Append-only journal file replayed on open
//! - [`InMemoryLockTable`] - Process-local lock table with lease expiry
//!
//! ## Example
//!
//! ```rust
//! use rowsync_storage::{InMemoryBackend, KeyRange, Precondition, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! let v1 = backend.put("rows", "r1", b"hello", Precondition::Absent).unwrap();
//! assert_eq!(v1, 1);
//!
//! let found = backend.get("rows", "r1").unwrap().unwrap();
//! assert_eq!(found.value, b"hello");
//!
//! let all = backend.scan("rows", &KeyRange::all(), None).unwrap();
//! assert_eq!(all.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod error;
mod file;
mod lock;
mod memory;

pub use backend::{KeyRange, Precondition, StorageBackend, Versioned};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use lock::{InMemoryLockTable, TaskLock};
pub use memory::InMemoryBackend;
