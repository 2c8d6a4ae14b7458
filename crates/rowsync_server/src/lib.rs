//! # rowsync server
//!
//! Reference HTTP binding for the rowsync engine.
//!
//! This crate provides:
//! - [`RequestHandler`]: transport-independent request handling
//! - [`http::router`]: the axum router for the diff and row endpoints
//! - [`SyncServer`]: opens the store and serves HTTP
//!
//! # Identity
//!
//! Authentication happens in front of the server. The authenticated user
//! is passed in the `X-Rowsync-User` header and resolved into table
//! permissions by a [`rowsync_engine::PermissionResolver`].
//!
//! # Errors
//!
//! Engine errors are returned as a JSON [`rowsync_protocol::ErrorBody`]
//! with these statuses:
//!
//! | Error | Status |
//! |-------|--------|
//! | `NotFound` | 404 |
//! | `PermissionDenied` | 403 |
//! | `Conflict`, `TableDataETagMismatch`, `IllegalStateTransition` | 409 |
//! | `InconsistentState` | 410 |
//! | `BadColumnName`, malformed request | 400 |
//! | `TaskLockTimeout` | 503 |
//! | anything else | 500 |

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
pub mod http;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
