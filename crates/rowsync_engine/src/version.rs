//! Version Authority: the only source of dataETag and rowETag values.
//!
//! A dataETag is the commit timestamp rendered as fixed-width ISO-8601 UTC
//! with nanosecond precision, so that string order equals time order. When
//! the clock has not moved past the current tag (coarse clock, skew), the
//! tag one nanosecond above the current one is used instead.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rowsync_protocol::{DataETag, RowETag};
use std::sync::Arc;
use uuid::Uuid;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward (or back, for a negative duration).
    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Mints dataETags and rowETags.
///
/// # Invariants
///
/// - Every dataETag returned by [`next_data_etag`](Self::next_data_etag) is
///   strictly greater than the `current` tag passed in.
/// - Callers hold the table lock while minting and persisting a dataETag.
#[derive(Clone)]
pub struct VersionAuthority {
    clock: Arc<dyn Clock>,
}

impl VersionAuthority {
    /// Creates an authority backed by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Creates an authority backed by the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Returns the next dataETag after `current`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no tag greater than `current` can be
    /// produced, which happens only when `current` is not a tag this
    /// authority minted.
    pub fn next_data_etag(&self, current: Option<&DataETag>) -> EngineResult<DataETag> {
        let candidate = format_timestamp(self.clock.now());
        let Some(current) = current else {
            return Ok(DataETag::new(candidate));
        };
        if candidate.as_str() > current.as_str() {
            return Ok(DataETag::new(candidate));
        }

        let parsed = DateTime::parse_from_rfc3339(current.as_str()).map_err(|e| {
            EngineError::InvariantViolation(format!(
                "current dataETag {current} is not a timestamp: {e}"
            ))
        })?;
        let bumped = format_timestamp(parsed.with_timezone(&Utc) + ChronoDuration::nanoseconds(1));
        if bumped.as_str() > current.as_str() {
            tracing::debug!(current = %current, next = %bumped, "clock behind current dataETag");
            Ok(DataETag::new(bumped))
        } else {
            Err(EngineError::InvariantViolation(format!(
                "could not mint a dataETag greater than {current}"
            )))
        }
    }

    /// Returns a fresh rowETag.
    pub fn next_row_etag(&self) -> RowETag {
        RowETag::new(Uuid::new_v4().to_string())
    }

    /// Returns the current time, as seen by this authority.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for VersionAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionAuthority").finish_non_exhaustive()
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
