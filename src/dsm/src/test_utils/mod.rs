// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

use std::io;
use std::net::SocketAddrV4;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{DsmEngine, EngineError, EngineHandle, UnmapRequest};
use crate::memory::{GuestRam, GuestRamError, RamSpan};
use crate::node::{NodeId, NodeRegistry};
use crate::region::RegionTable;
use crate::timer::{Scheduler, TimerCallback, TimerHandle};

/// Engine double recording every call.
#[derive(Debug)]
pub struct MockEngine {
    fd: RawFd,
    fail_open: bool,
    fail_unmap_at: Option<usize>,
    pub master_calls: Mutex<Vec<(NodeRegistry, RegionTable)>>,
    pub client_calls: Mutex<Vec<(RamSpan, NodeId, SocketAddrV4)>>,
    pub unmaps: Mutex<Vec<UnmapRequest>>,
}

impl MockEngine {
    /// Engine whose open calls return `fd`.
    pub fn new(fd: RawFd) -> Self {
        MockEngine {
            fd,
            fail_open: false,
            fail_unmap_at: None,
            master_calls: Mutex::new(Vec::new()),
            client_calls: Mutex::new(Vec::new()),
            unmaps: Mutex::new(Vec::new()),
        }
    }

    /// Open calls fail with `ECONNREFUSED`.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// The unmap call with index `idx` (0-based) fails.
    pub fn fail_unmap_at(mut self, idx: usize) -> Self {
        self.fail_unmap_at = Some(idx);
        self
    }

    pub fn unmaps(&self) -> Vec<UnmapRequest> {
        self.unmaps.lock().unwrap().clone()
    }

    pub fn master_calls(&self) -> Vec<(NodeRegistry, RegionTable)> {
        self.master_calls.lock().unwrap().clone()
    }

    pub fn client_calls(&self) -> Vec<(RamSpan, NodeId, SocketAddrV4)> {
        self.client_calls.lock().unwrap().clone()
    }
}

impl DsmEngine for MockEngine {
    fn open_as_master(
        &self,
        nodes: &NodeRegistry,
        regions: &RegionTable,
    ) -> Result<RawFd, EngineError> {
        self.master_calls
            .lock()
            .unwrap()
            .push((nodes.clone(), regions.clone()));
        if self.fail_open {
            return Err(EngineError::OpenMaster(io::Error::from_raw_os_error(
                libc::ECONNREFUSED,
            )));
        }
        Ok(self.fd)
    }

    fn open_as_client(
        &self,
        span: RamSpan,
        local: NodeId,
        master: SocketAddrV4,
    ) -> Result<RawFd, EngineError> {
        self.client_calls.lock().unwrap().push((span, local, master));
        if self.fail_open {
            return Err(EngineError::OpenClient(io::Error::from_raw_os_error(
                libc::ECONNREFUSED,
            )));
        }
        Ok(self.fd)
    }

    fn unmap_range(&self, handle: &EngineHandle, req: &UnmapRequest) -> Result<(), EngineError> {
        assert_eq!(handle.as_raw_fd(), self.fd);
        let mut unmaps = self.unmaps.lock().unwrap();
        if self.fail_unmap_at == Some(unmaps.len()) {
            return Err(EngineError::Unmap {
                addr: req.addr,
                len: req.len,
                source: io::Error::from_raw_os_error(libc::EIO),
            });
        }
        unmaps.push(req.clone());
        Ok(())
    }
}

/// RAM double recording touched offsets.
#[derive(Debug)]
pub struct TestRam {
    span: Option<RamSpan>,
    fail_at: Option<u64>,
    touched: Mutex<Vec<u64>>,
}

impl TestRam {
    pub fn new(host_addr: u64, size: u64) -> Self {
        TestRam {
            span: Some(RamSpan { host_addr, size }),
            fail_at: None,
            touched: Mutex::new(Vec::new()),
        }
    }

    /// Provider without a RAM block.
    pub fn without_ram() -> Self {
        TestRam {
            span: None,
            fail_at: None,
            touched: Mutex::new(Vec::new()),
        }
    }

    /// Touching `offset` fails.
    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    pub fn touched(&self) -> Vec<u64> {
        self.touched.lock().unwrap().clone()
    }
}

impl GuestRam for TestRam {
    fn ram_span(&self) -> Option<RamSpan> {
        self.span
    }

    fn touch(&self, offset: u64) -> Result<(), GuestRamError> {
        if self.fail_at == Some(offset) {
            return Err(GuestRamError::OutOfRange(offset));
        }
        self.touched.lock().unwrap().push(offset);
        Ok(())
    }
}

/// Scheduler whose timers only fire when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    fail: bool,
    next_id: AtomicU64,
    timers: Mutex<Vec<(u64, Duration, TimerCallback)>>,
}

impl ManualScheduler {
    /// Every `schedule_once` call fails.
    pub fn failing() -> Self {
        ManualScheduler {
            fail: true,
            ..Default::default()
        }
    }

    /// Delays of the pending timers.
    pub fn delays(&self) -> Vec<Duration> {
        self.timers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, delay, _)| *delay)
            .collect()
    }

    /// Runs every pending callback. Returns how many ran.
    pub fn fire_all(&self) -> usize {
        let timers: Vec<_> = self.timers.lock().unwrap().drain(..).collect();
        let count = timers.len();
        for (_, _, callback) in timers {
            callback();
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> io::Result<TimerHandle> {
        if self.fail {
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.timers.lock().unwrap().push((id, delay, callback));
        Ok(TimerHandle::new(id))
    }

    fn cancel(&self, handle: &TimerHandle) {
        self.timers
            .lock()
            .unwrap()
            .retain(|(id, _, _)| *id != handle.id());
    }
}
