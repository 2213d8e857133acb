// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};

use crate::logger::{IncMetric, METRICS};
use crate::memory::{GuestRam, GuestRamError};

/// Name of the prefetch worker threads.
pub const RAM_TOUCH_THREAD: &str = "dsm_ram_touch";

/// Starts a worker that reads one word of every page of `ram`, pulling it to the local node.
///
/// The worker cannot be cancelled. Dropping the handle detaches it.
pub fn spawn_ram_touch(ram: Arc<dyn GuestRam>, page_size: u64) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(String::from(RAM_TOUCH_THREAD))
        .spawn(move || match touch_all_ram(ram.as_ref(), page_size) {
            Ok(pages) => {
                METRICS.prefetch.prefetch_count.inc();
                info!("Pulled {pages} pages to the local node, the source can be terminated");
            }
            Err(err) => {
                METRICS.prefetch.prefetch_fails.inc();
                warn!("Stopped pulling guest RAM: {err}");
            }
        })
}

/// Touches every page of the RAM span in order. Returns the number of pages read.
pub(crate) fn touch_all_ram(ram: &dyn GuestRam, page_size: u64) -> Result<u64, GuestRamError> {
    let Some(span) = ram.ram_span() else {
        return Err(GuestRamError::NoRamBlock);
    };
    if page_size == 0 {
        return Ok(0);
    }

    let mut pages = 0;
    let mut offset = 0;
    while offset < span.size {
        ram.touch(offset)?;
        METRICS.prefetch.pages_touched.inc();
        pages += 1;
        offset += page_size;
    }
    Ok(pages)
}
