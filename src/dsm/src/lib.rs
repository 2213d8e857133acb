// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coordination layer for a distributed shared memory (DSM) fabric used to live-migrate
//! virtual machines over RDMA.
//!
//! One node (the master) owns the authoritative copy of guest memory, the other nodes
//! (clients) pull pages on demand. This crate builds and validates the membership and
//! region configuration handed to the DSM engine, drives the pre-copy/post-copy phase
//! transition and turns per-round dirty bitmaps into unmap requests.
//!
//! The RDMA transport and page-fault servicing live in the external engine, reached
//! through the [`engine::DsmEngine`] trait.
#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

/// Live-migration setup of the two-node master/client configuration.
pub mod bootstrap;
/// Option-string parsing into node and region tables.
pub mod config;
/// Dirty bitmap to byte range reduction.
pub mod dirty;
/// Boundary with the external DSM engine.
pub mod engine;
/// Logging and metrics.
pub mod logger;
/// Boundary with the guest memory provider.
pub mod memory;
/// Node identifiers and the node registry.
pub mod node;
/// Pre-copy/post-copy phase controller.
pub mod phase;
/// Background pull of guest RAM.
pub mod prefetch;
/// Memory regions and the region table.
pub mod region;
/// An opened DSM session.
pub mod session;
/// One-shot timers.
pub mod timer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::bootstrap::{
    ip_from_uri, migrate_dest_init, migrate_src_init, open_client, open_master, BootstrapError,
};
pub use crate::config::{
    ClientConfig, ConfigBuilder, ConfigError, DsmOptions, MasterConfig, MigrationPorts,
};
pub use crate::dirty::{dirty_ranges, DirtyRange, DirtyRanges, DIRTY_FLAG};
pub use crate::engine::{DsmEngine, EngineError, EngineHandle, UnmapRequest};
pub use crate::memory::{GuestRam, GuestRamError, RamSpan};
pub use crate::node::{DomainId, Node, NodeEndpoint, NodeError, NodeId, NodeRegistry};
pub use crate::phase::{MigrationPhase, Phase, PhaseError};
pub use crate::region::{MemoryRegion, OwnerList, RegionError, RegionFlags, RegionTable};
pub use crate::session::{DsmSession, Role, SessionError};
pub use crate::timer::{Scheduler, TimerFdScheduler, TimerHandle};

/// Size of a guest page, in bytes. Region sizes and dirty bitmap entries use this unit.
pub const GUEST_PAGE_SIZE: u64 = 4096;
