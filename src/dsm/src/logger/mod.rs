// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging and metrics collection for the DSM coordinator.

mod logging;
mod metrics;

use std::sync::LockResult;

pub use log::{debug, error, info, trace, warn};

pub use crate::logger::logging::{
    LevelFilter, LevelFilterFromStrError, Logger, LoggerConfig, LoggerInitError,
    LoggerUpdateError, DEFAULT_INSTANCE_ID, DEFAULT_LEVEL, INSTANCE_ID, LOGGER,
};
pub use crate::logger::metrics::{
    DsmMetrics, IncMetric, Metrics, MetricsError, SharedIncMetric, METRICS,
};

/// Alias for `std::io::LineWriter<std::fs::File>`.
pub type DsmLineWriter = std::io::LineWriter<std::fs::File>;

/// Takes the guard out of a possibly poisoned lock.
pub(crate) fn extract_guard<G>(lock_result: LockResult<G>) -> G {
    match lock_result {
        Ok(guard) => guard,
        // The writer is still usable after a panic while holding the lock.
        Err(poisoned) => poisoned.into_inner(),
    }
}
