//! Stress tests for concurrent writers.
//!
//! Writers on separate threads commit rows to one table while contending
//! for its lock.

use rowsync_engine::{EngineError, EngineResult, SyncEngine};
use rowsync_protocol::{DataETag, Row};
use std::thread;
use std::time::{Duration, Instant};

use crate::fixtures::admin;

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent writer threads.
    pub writers: usize,
    /// Rows each writer commits.
    pub writes_per_writer: usize,
    /// Attempts per write before giving up on a retryable error.
    pub max_attempts: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            writes_per_writer: 25,
            max_attempts: 50,
        }
    }
}

impl StressConfig {
    /// Creates a config with `writers` threads of `writes_per_writer` rows.
    pub fn new(writers: usize, writes_per_writer: usize) -> Self {
        Self {
            writers,
            writes_per_writer,
            ..Self::default()
        }
    }
}

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// dataETags minted for each writer, in the order it committed.
    pub committed: Vec<Vec<DataETag>>,
    /// Retryable errors absorbed by retrying.
    pub retries: usize,
    /// Writes that failed for good.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Number of successful writes.
    pub fn successful(&self) -> usize {
        self.committed.iter().map(Vec::len).sum()
    }

    /// Writes per second.
    pub fn writes_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.successful() as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Successful: {}", self.successful());
        println!("Failed: {}", self.failed);
        println!("Retries: {}", self.retries);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} writes/sec", self.writes_per_second());
    }
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached. Returns the result and the retry count.
pub fn with_retries<T>(
    max_attempts: usize,
    mut f: impl FnMut() -> EngineResult<T>,
) -> (EngineResult<T>, usize) {
    let mut retries = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() && retries + 1 < max_attempts => retries += 1,
            result => return (result, retries),
        }
    }
}

/// Inserts distinct rows into `table_id` from `config.writers` threads at
/// once.
pub fn stress_concurrent_writers(
    engine: &SyncEngine,
    table_id: &str,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();

    let outcomes: Vec<(Vec<DataETag>, usize, usize)> = thread::scope(|s| {
        let handles: Vec<_> = (0..config.writers)
            .map(|w| {
                s.spawn(move || {
                    let mut committed = Vec::new();
                    let (mut retries, mut failed) = (0, 0);
                    let data = match engine.data(table_id, admin()) {
                        Ok(data) => data,
                        Err(_) => return (committed, retries, config.writes_per_writer),
                    };
                    for i in 0..config.writes_per_writer {
                        let row = Row::new(format!("w{w}-{i}")).with_value("name", format!("{w}/{i}"));
                        let (result, r) = with_retries(config.max_attempts, || {
                            data.insert_or_update_row(row.clone())
                        });
                        retries += r;
                        match result.and_then(|row| {
                            row.data_etag_at_modification.ok_or_else(|| {
                                EngineError::InvariantViolation("row without dataETag".into())
                            })
                        }) {
                            Ok(tag) => committed.push(tag),
                            Err(_) => failed += 1,
                        }
                    }
                    (committed, retries, failed)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| (Vec::new(), 0, config.writes_per_writer)))
            .collect()
    });

    let mut result = StressTestResult {
        committed: Vec::with_capacity(outcomes.len()),
        retries: 0,
        failed: 0,
        duration: start.elapsed(),
    };
    for (committed, retries, failed) in outcomes {
        result.committed.push(committed);
        result.retries += retries;
        result.failed += failed;
    }
    result
}
