// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::dirty::dirty_ranges;
use crate::engine::{DsmEngine, EngineError, EngineHandle, UnmapRequest};
use crate::logger::{IncMetric, METRICS};
use crate::memory::{GuestRam, RamSpan};
use crate::node::{DomainId, NodeId, NodeRegistry};
use crate::phase::MigrationPhase;
use crate::prefetch::spawn_ram_touch;
use crate::region::{OwnerList, RegionTable};
use crate::timer::TimerHandle;

/// Errors associated with an opened session.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum SessionError {
    /// Range at offset {offset:#x} with length {len:#x} is outside the {size:#x} bytes of guest RAM
    RangeOutOfBounds {
        /// Offset from the start of guest RAM.
        offset: u64,
        /// Length of the range.
        len: u64,
        /// Size of the RAM span.
        size: u64,
    },
    /// Domain {domain_id} has {peers} peers, more than an unmap request can name
    TooManyPeers {
        /// Domain of the session.
        domain_id: DomainId,
        /// Number of nodes other than the local one.
        peers: usize,
    },
    /// {0}
    Engine(#[from] EngineError),
}

/// Part a node plays in the domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Holds the authoritative copy of guest memory.
    Master,
    /// Pulls pages from the master on demand.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Everything a session needs once the engine accepted it.
pub(crate) struct SessionParts {
    pub role: Role,
    pub domain_id: DomainId,
    pub local_node_id: NodeId,
    pub nodes: NodeRegistry,
    pub regions: RegionTable,
    pub span: RamSpan,
    pub unmap_owners: OwnerList,
    pub timer: Option<TimerHandle>,
}

/// An opened DSM session: configuration, engine handle and migration phase.
pub struct DsmSession {
    engine: Arc<dyn DsmEngine>,
    ram: Arc<dyn GuestRam>,
    handle: EngineHandle,
    role: Role,
    domain_id: DomainId,
    local_node_id: NodeId,
    nodes: NodeRegistry,
    regions: RegionTable,
    span: RamSpan,
    unmap_owners: OwnerList,
    phase: Arc<MigrationPhase>,
    timer: Option<TimerHandle>,
    page_size: u64,
    prefetch_workers: AtomicUsize,
}

impl fmt::Debug for DsmSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsmSession")
            .field("handle", &self.handle)
            .field("role", &self.role)
            .field("domain_id", &self.domain_id)
            .field("local_node_id", &self.local_node_id)
            .field("span", &self.span)
            .field("phase", &self.phase.phase())
            .finish_non_exhaustive()
    }
}

/// Nodes named as owners of a range unmapped locally. On a client the dirty pages are
/// newest at the client itself, which is node 2 in a live migration.
///
/// Fails when a master has more peers than
/// [`MAX_REGION_OWNERS`](crate::region::MAX_REGION_OWNERS).
pub(crate) fn range_owners(
    role: Role,
    domain_id: DomainId,
    local: NodeId,
    nodes: &NodeRegistry,
) -> Result<OwnerList, SessionError> {
    let owners: Vec<NodeId> = match role {
        Role::Master => nodes
            .iter()
            .filter(|node| node.domain_id == domain_id && node.node_id != local)
            .map(|node| node.node_id)
            .collect(),
        Role::Client => vec![local],
    };
    OwnerList::try_from(owners.as_slice())
        .map_err(|peers| SessionError::TooManyPeers { domain_id, peers })
}

impl DsmSession {
    pub(crate) fn new(
        engine: Arc<dyn DsmEngine>,
        ram: Arc<dyn GuestRam>,
        handle: EngineHandle,
        phase: Arc<MigrationPhase>,
        page_size: u64,
        parts: SessionParts,
    ) -> Self {
        DsmSession {
            engine,
            ram,
            handle,
            role: parts.role,
            domain_id: parts.domain_id,
            local_node_id: parts.local_node_id,
            nodes: parts.nodes,
            regions: parts.regions,
            span: parts.span,
            unmap_owners: parts.unmap_owners,
            phase,
            timer: parts.timer,
            page_size,
            prefetch_workers: AtomicUsize::new(0),
        }
    }

    /// Drops `len` bytes at `offset` from the start of guest RAM, leaving the peers as owners.
    pub fn unmap_range(&self, offset: u64, len: u64) -> Result<(), SessionError> {
        if !self.span.contains_range(offset, len) {
            return Err(SessionError::RangeOutOfBounds {
                offset,
                len,
                size: self.span.size,
            });
        }

        let req = UnmapRequest {
            domain_id: self.domain_id,
            addr: self.span.host_addr + offset,
            len,
            owners: self.unmap_owners.clone(),
        };
        METRICS.unmap.unmap_count.inc();
        self.engine
            .unmap_range(&self.handle, &req)
            .inspect_err(|_| METRICS.unmap.unmap_fails.inc())?;
        METRICS.unmap.unmapped_bytes.add(len);
        debug!("Unmapped {len:#x} bytes at offset {offset:#x}");
        Ok(())
    }

    /// Unmaps every dirty run of `bitmap` (one byte per page), then starts pulling the rest
    /// of guest RAM in the background. Stops at the first engine failure.
    ///
    /// Returns the number of ranges unmapped.
    pub fn unmap_dirty_bitmap(&self, bitmap: &[u8]) -> Result<usize, SessionError> {
        let mut count = 0;
        for range in dirty_ranges(bitmap, self.page_size) {
            self.unmap_range(range.offset, range.len)?;
            count += 1;
        }
        info!("Unmapped {count} dirty ranges");

        match spawn_ram_touch(self.ram.clone(), self.page_size) {
            Ok(_) => {
                self.prefetch_workers.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => warn!("Failed to start pulling guest RAM: {err}"),
        }
        Ok(count)
    }

    /// Validated engine handle.
    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Role of the local node.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Domain of the session.
    pub fn domain_id(&self) -> DomainId {
        self.domain_id
    }

    /// Id of the local node.
    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    /// Nodes registered with the engine. Empty for clients.
    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    /// Regions registered with the engine. Empty for clients.
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Guest RAM span the session covers.
    pub fn ram_span(&self) -> RamSpan {
        self.span
    }

    /// Page size dirty bitmaps are reduced with.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Owners attached to every unmapped range.
    pub fn unmap_owners(&self) -> &OwnerList {
        &self.unmap_owners
    }

    /// Phase controller of the migration.
    pub fn phase(&self) -> &Arc<MigrationPhase> {
        &self.phase
    }

    /// Number of RAM prefetch workers this session started.
    pub fn prefetch_workers(&self) -> usize {
        self.prefetch_workers.load(Ordering::Relaxed)
    }

    /// Pre-copy timer armed when the session was opened, if any.
    pub fn timer(&self) -> Option<TimerHandle> {
        self.timer
    }
}
