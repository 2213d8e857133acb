// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Defines the metrics system.
//!
//! # Metrics format
//! The metrics are flushed in JSON format. The first field is always the timestamp, followed by
//! one object per component.
//!
//! ```json
//! {
//!  "utc_timestamp_ms": 1541591155180,
//!  "unmap": {
//!    "unmap_count": 12,
//!    "unmap_fails": 0,
//!    "unmapped_bytes": 49152
//!  },
//!  "prefetch": {
//!    "prefetch_count": 1,
//!    "prefetch_fails": 0,
//!    "pages_touched": 1024
//!  },
//!  "phase": {
//!    "timer_expirations": 1,
//!    "post_copy_entries": 1
//!  },
//!  "logger": {
//!    "missed_log_count": 0
//!  }
//! }
//! ```
//!
//! Counters are `SharedIncMetric`s: each keeps the current value and the value at the last
//! flush, and serializes the delta. Serializing resets them.

use std::fmt::Debug;
use std::io::Write;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use serde::{Serialize, Serializer};

use super::DsmLineWriter;

/// Static instance used for handling metrics.
pub static METRICS: Metrics<DsmMetrics, DsmLineWriter> =
    Metrics::<DsmMetrics, DsmLineWriter>::new(DsmMetrics::new());

/// Metrics system.
// All member fields are Sync and use interior mutability, so operations can be called on a
// non-mut static.
#[derive(Debug)]
pub struct Metrics<T: Serialize, M: Write + Send> {
    // Metrics will get flushed here.
    metrics_buf: OnceLock<Mutex<M>>,
    /// Application counters.
    pub app_metrics: T,
}

impl<T: Serialize + Debug, M: Write + Send + Debug> Metrics<T, M> {
    /// Creates a new instance of the current metrics.
    pub const fn new(app_metrics: T) -> Metrics<T, M> {
        Metrics {
            metrics_buf: OnceLock::new(),
            app_metrics,
        }
    }

    /// Sets the metrics destination. Only the first call succeeds.
    pub fn init(&self, metrics_dest: M) -> Result<(), MetricsError> {
        self.metrics_buf
            .set(Mutex::new(metrics_dest))
            .map_err(|_| MetricsError::AlreadyInitialized)
    }

    /// Writes one JSON line with the counter deltas since the previous write.
    ///
    /// Returns `Ok(false)` when no destination was set.
    pub fn write(&self) -> Result<bool, MetricsError> {
        let Some(lock) = self.metrics_buf.get() else {
            return Ok(false);
        };
        let msg = serde_json::to_string(&self.app_metrics)
            .map_err(|err| MetricsError::Serde(err.to_string()))?;
        let mut guard = super::extract_guard(lock.lock());
        guard
            .write_all(format!("{msg}\n").as_bytes())
            .map_err(MetricsError::Write)?;
        Ok(true)
    }
}

impl<T: Serialize + Debug, M: Write + Send + Debug> Deref for Metrics<T, M> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.app_metrics
    }
}

/// Describes the errors which may occur while handling metrics.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum MetricsError {
    /// Reinitialization of metrics not allowed.
    AlreadyInitialized,
    /// {0}
    Serde(String),
    /// Failed to write metrics: {0}
    Write(std::io::Error),
}

/// Metrics that act as a counter.
pub trait IncMetric {
    /// Adds `value` to the current counter.
    fn add(&self, value: u64);
    /// Increments by 1 unit the current counter.
    fn inc(&self) {
        self.add(1);
    }
    /// Returns current value of the counter.
    fn count(&self) -> u64;
}

/// Counter that can be incremented from several threads.
// 1st member - current value being updated
// 2nd member - value at the last flush
#[derive(Debug, Default)]
pub struct SharedIncMetric(AtomicU64, AtomicU64);

impl SharedIncMetric {
    /// Const default construction.
    pub const fn new() -> Self {
        Self(AtomicU64::new(0), AtomicU64::new(0))
    }
}

impl IncMetric for SharedIncMetric {
    fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Serialize for SharedIncMetric {
    /// Serializes the delta since the last flush and resets it.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let snapshot = self.0.load(Ordering::Relaxed);
        let res = serializer.serialize_u64(snapshot - self.1.load(Ordering::Relaxed));

        if res.is_ok() {
            self.1.store(snapshot, Ordering::Relaxed);
        }
        res
    }
}

#[derive(Debug, Default)]
struct SerializeToUtcTimestampMs;

impl SerializeToUtcTimestampMs {
    const fn new() -> Self {
        SerializeToUtcTimestampMs
    }
}

impl Serialize for SerializeToUtcTimestampMs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(utils::time::get_time_ms(utils::time::ClockType::Real))
    }
}

/// Metrics of the dirty-range unmap path.
#[derive(Debug, Default, Serialize)]
pub struct UnmapMetrics {
    /// Number of ranges handed to the engine.
    pub unmap_count: SharedIncMetric,
    /// Number of ranges the engine failed to unmap.
    pub unmap_fails: SharedIncMetric,
    /// Bytes successfully unmapped.
    pub unmapped_bytes: SharedIncMetric,
}

impl UnmapMetrics {
    /// Const default construction.
    pub const fn new() -> Self {
        Self {
            unmap_count: SharedIncMetric::new(),
            unmap_fails: SharedIncMetric::new(),
            unmapped_bytes: SharedIncMetric::new(),
        }
    }
}

/// Metrics of the RAM prefetch worker.
#[derive(Debug, Default, Serialize)]
pub struct PrefetchMetrics {
    /// Number of completed RAM walks.
    pub prefetch_count: SharedIncMetric,
    /// Number of RAM walks aborted by a read failure.
    pub prefetch_fails: SharedIncMetric,
    /// Pages read by the workers.
    pub pages_touched: SharedIncMetric,
}

impl PrefetchMetrics {
    /// Const default construction.
    pub const fn new() -> Self {
        Self {
            prefetch_count: SharedIncMetric::new(),
            prefetch_fails: SharedIncMetric::new(),
            pages_touched: SharedIncMetric::new(),
        }
    }
}

/// Metrics of the migration phase controller.
#[derive(Debug, Default, Serialize)]
pub struct PhaseMetrics {
    /// Number of pre-copy timer expirations.
    pub timer_expirations: SharedIncMetric,
    /// Number of switches to post-copy.
    pub post_copy_entries: SharedIncMetric,
}

impl PhaseMetrics {
    /// Const default construction.
    pub const fn new() -> Self {
        Self {
            timer_expirations: SharedIncMetric::new(),
            post_copy_entries: SharedIncMetric::new(),
        }
    }
}

/// Metrics of the logging subsystem.
#[derive(Debug, Default, Serialize)]
pub struct LoggerSystemMetrics {
    /// Number of log lines that could not be written.
    pub missed_log_count: SharedIncMetric,
}

impl LoggerSystemMetrics {
    /// Const default construction.
    pub const fn new() -> Self {
        Self {
            missed_log_count: SharedIncMetric::new(),
        }
    }
}

/// Structure storing all metrics while enforcing serialization support on them.
#[derive(Debug, Default, Serialize)]
pub struct DsmMetrics {
    utc_timestamp_ms: SerializeToUtcTimestampMs,
    /// Dirty-range unmap metrics.
    pub unmap: UnmapMetrics,
    /// RAM prefetch metrics.
    pub prefetch: PrefetchMetrics,
    /// Phase controller metrics.
    pub phase: PhaseMetrics,
    /// Logging subsystem metrics.
    pub logger: LoggerSystemMetrics,
}

impl DsmMetrics {
    /// Const default construction.
    pub const fn new() -> Self {
        Self {
            utc_timestamp_ms: SerializeToUtcTimestampMs::new(),
            unmap: UnmapMetrics::new(),
            prefetch: PrefetchMetrics::new(),
            phase: PhaseMetrics::new(),
            logger: LoggerSystemMetrics::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, LineWriter};
    use std::sync::Arc;
    use std::thread;

    use utils::tempfile::TempFile;

    use super::*;

    #[test]
    fn test_init() {
        // Uses a local instance so the global METRICS stays untouched.
        let m = &Metrics::<_, DsmLineWriter>::new(DsmMetrics::new());

        // Writing before init is not an error.
        assert!(!m.write().unwrap());

        let f = TempFile::new().unwrap();
        m.init(LineWriter::new(f.into_file())).unwrap();
        assert!(m.write().unwrap());

        let f = TempFile::new().unwrap();
        m.init(LineWriter::new(f.into_file())).unwrap_err();
    }

    #[test]
    fn test_shared_inc_metric() {
        const NUM_THREADS_TO_SPAWN: usize = 4;
        const NUM_INCREMENTS_PER_THREAD: u64 = 10_000;
        const INITIAL_COUNT: u64 = 123;

        let metric = Arc::new(SharedIncMetric::default());
        metric.add(INITIAL_COUNT);

        let handles: Vec<_> = (0..NUM_THREADS_TO_SPAWN)
            .map(|_| {
                let r = metric.clone();
                thread::spawn(move || {
                    for _ in 0..NUM_INCREMENTS_PER_THREAD {
                        r.inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            metric.count(),
            INITIAL_COUNT + NUM_THREADS_TO_SPAWN as u64 * NUM_INCREMENTS_PER_THREAD
        );
    }

    #[test]
    fn test_serialize_resets_delta() {
        let metrics = DsmMetrics::new();
        metrics.unmap.unmap_count.add(3);
        metrics.unmap.unmapped_bytes.add(0x3000);

        let first: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&metrics).unwrap()).unwrap();
        assert_eq!(first["unmap"]["unmap_count"], 3);
        assert_eq!(first["unmap"]["unmapped_bytes"], 0x3000);
        assert!(first["utc_timestamp_ms"].as_u64().unwrap() > 0);

        let second: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&metrics).unwrap()).unwrap();
        assert_eq!(second["unmap"]["unmap_count"], 0);
        assert_eq!(metrics.unmap.unmap_count.count(), 3);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            MetricsError::AlreadyInitialized.to_string(),
            "Reinitialization of metrics not allowed."
        );
        assert_eq!(
            MetricsError::Write(std::io::Error::new(ErrorKind::Interrupted, "write")).to_string(),
            "Failed to write metrics: write"
        );
        assert_eq!(
            MetricsError::Serde("bad data".to_string()).to_string(),
            "bad data"
        );
    }
}
