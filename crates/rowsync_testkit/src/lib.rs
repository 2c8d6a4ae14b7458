//! # rowsync testkit
//!
//! Test utilities for rowsync.
//!
//! This crate provides:
//! - Engine fixtures over in-memory and journal-backed storage
//! - Property-based test generators using proptest
//! - A client replica that follows a table through the diff API
//! - Stress testing utilities for concurrent writers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_engine() {
//!     with_people(|engine| {
//!         let data = engine.data(PEOPLE, admin());
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod replica;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::replica::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use replica::*;
pub use stress::*;
