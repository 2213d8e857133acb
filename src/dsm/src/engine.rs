// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddrV4;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::memory::RamSpan;
use crate::node::{DomainId, NodeId, NodeRegistry};
use crate::region::{OwnerList, RegionTable};

/// Errors reported by the DSM engine.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum EngineError {
    /// Failed to open the engine as master: {0}
    OpenMaster(io::Error),
    /// Failed to open the engine as client: {0}
    OpenClient(io::Error),
    /// Failed to unmap {len:#x} bytes at {addr:#x}: {source}
    Unmap {
        /// Host address of the range.
        addr: u64,
        /// Length of the range.
        len: u64,
        /// Underlying engine error.
        source: io::Error,
    },
}

/// Validated descriptor of an opened engine session.
#[derive(Debug, PartialEq, Eq)]
pub struct EngineHandle(RawFd);

impl EngineHandle {
    /// Wraps a descriptor returned by the engine. Zero and negative values are rejected.
    pub fn from_raw(fd: RawFd) -> Option<Self> {
        (fd > 0).then_some(EngineHandle(fd))
    }
}

impl AsRawFd for EngineHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Request to drop a host range locally and mark it as owned by `owners`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnmapRequest {
    /// Domain the range belongs to.
    pub domain_id: DomainId,
    /// Host virtual address of the first byte.
    pub addr: u64,
    /// Length in bytes.
    pub len: u64,
    /// Nodes that hold the up-to-date copy.
    pub owners: OwnerList,
}

/// The external engine that moves pages over RDMA and services page faults.
pub trait DsmEngine: Send + Sync {
    /// Registers the node and region tables with the engine and makes this node the master.
    fn open_as_master(&self, nodes: &NodeRegistry, regions: &RegionTable)
        -> Result<RawFd, EngineError>;

    /// Connects the local RAM span to the master at `master`.
    fn open_as_client(
        &self,
        span: RamSpan,
        local: NodeId,
        master: SocketAddrV4,
    ) -> Result<RawFd, EngineError>;

    /// Drops the range described by `req` locally.
    fn unmap_range(&self, handle: &EngineHandle, req: &UnmapRequest) -> Result<(), EngineError>;
}
