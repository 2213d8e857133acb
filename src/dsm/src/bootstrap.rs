// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Opening DSM sessions.
//!
//! Live migration always uses domain 1 with two nodes: the destination is the master
//! (node 1) and the source is the client (node 2). Text-configured sessions go through
//! [`open_master`] and [`open_client`] instead.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::config::{ClientConfig, MasterConfig, MigrationPorts};
use crate::engine::{DsmEngine, EngineError, EngineHandle};
use crate::memory::{GuestRam, RamSpan};
use crate::node::{DomainId, Node, NodeEndpoint, NodeError, NodeId, NodeRegistry};
use crate::phase::{MigrationPhase, PhaseError};
use crate::region::{MemoryRegion, OwnerList, RegionError, RegionFlags, RegionTable};
use crate::session::{range_owners, DsmSession, Role, SessionError, SessionParts};
use crate::timer::Scheduler;
use crate::GUEST_PAGE_SIZE;

/// Id of the only region of a live migration.
pub const MIGRATION_REGION_ID: u32 = 1;

/// Errors associated with opening a DSM session.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum BootstrapError {
    /// Guest RAM has no block at guest address 0
    RamNotFound,
    /// Migration URI `{0}` does not name an IPv4 host
    InvalidUri(String),
    /// The DSM engine returned invalid handle {0}
    InvalidHandle(RawFd),
    /// {0}
    Engine(#[from] EngineError),
    /// {0}
    Timer(#[from] PhaseError),
    /// {0}
    Region(#[from] RegionError),
    /// {0}
    Node(#[from] NodeError),
    /// {0}
    Session(#[from] SessionError),
}

/// Extracts the host of a migration URI such as `tcp:10.0.0.2:4444`.
///
/// The scheme is the first `:`-delimited token and the host is the next one. Ports are ignored.
pub fn ip_from_uri(uri: &str) -> Option<Ipv4Addr> {
    let mut tokens = uri.split(':').filter(|token| !token.is_empty());
    tokens.next()?;
    tokens.next()?.parse().ok()
}

fn resolve_ram(ram: &dyn GuestRam) -> Result<RamSpan, BootstrapError> {
    let span = ram.ram_span().ok_or(BootstrapError::RamNotFound)?;
    debug!("Guest RAM at {:#x}, {:#x} bytes", span.host_addr, span.size);
    Ok(span)
}

fn validate_handle(raw: RawFd) -> Result<EngineHandle, BootstrapError> {
    EngineHandle::from_raw(raw).ok_or(BootstrapError::InvalidHandle(raw))
}

fn open_as_master(
    engine: Arc<dyn DsmEngine>,
    ram: Arc<dyn GuestRam>,
    domain_id: DomainId,
    nodes: NodeRegistry,
    regions: RegionTable,
    span: RamSpan,
    page_size: u64,
) -> Result<DsmSession, BootstrapError> {
    let unmap_owners = range_owners(Role::Master, domain_id, NodeId::MASTER, &nodes)?;
    debug!("Initializing DSM master");
    let handle = validate_handle(engine.open_as_master(&nodes, &regions)?)?;
    info!(
        "DSM master is ready with {} nodes and {} regions",
        nodes.len(),
        regions.len()
    );

    Ok(DsmSession::new(
        engine,
        ram,
        handle,
        MigrationPhase::new(),
        page_size,
        SessionParts {
            role: Role::Master,
            domain_id,
            local_node_id: NodeId::MASTER,
            nodes,
            regions,
            span,
            unmap_owners,
            timer: None,
        },
    ))
}

/// Opens the destination of a live migration as the master of domain 1.
///
/// The whole guest RAM becomes region 1, copied on access from the source (node 2).
pub fn migrate_dest_init(
    engine: Arc<dyn DsmEngine>,
    ram: Arc<dyn GuestRam>,
    ports: &MigrationPorts,
    dest_ip: Ipv4Addr,
    source_ip: Ipv4Addr,
) -> Result<DsmSession, BootstrapError> {
    let domain_id = DomainId::LIVE_MIGRATION;
    let span = resolve_ram(ram.as_ref())?;

    let mut nodes = NodeRegistry::new();
    for (node_id, ip) in [
        (NodeId::MASTER, dest_ip),
        (NodeId::MIGRATION_CLIENT, source_ip),
    ] {
        nodes.insert(Node {
            domain_id,
            node_id,
            endpoint: NodeEndpoint {
                ip,
                rdma_port: ports.rdma_port,
                tcp_port: None,
            },
            is_master: node_id == NodeId::MASTER,
        })?;
    }

    let mut owners = OwnerList::new();
    owners
        .try_push(NodeId::MIGRATION_CLIENT)
        .map_err(|_| RegionError::TooManyOwners(MIGRATION_REGION_ID))?;
    let mut regions = RegionTable::new();
    regions.insert(MemoryRegion::new(
        domain_id,
        MIGRATION_REGION_ID,
        span.size,
        GUEST_PAGE_SIZE,
        owners,
        RegionFlags::COPY_ON_ACCESS,
    )?)?;
    regions.bind_to_ram(span)?;

    open_as_master(engine, ram, domain_id, nodes, regions, span, GUEST_PAGE_SIZE)
}

/// Opens the source of a live migration as client node 2 and arms the pre-copy timer.
///
/// The destination host comes from `uri` and is reached on the TCP sync port. The timer is
/// armed before connecting and cancelled again if the connection fails.
pub fn migrate_src_init(
    engine: Arc<dyn DsmEngine>,
    ram: Arc<dyn GuestRam>,
    scheduler: &dyn Scheduler,
    ports: &MigrationPorts,
    uri: &str,
    precopy: Duration,
) -> Result<DsmSession, BootstrapError> {
    let domain_id = DomainId::LIVE_MIGRATION;
    let local_node_id = NodeId::MIGRATION_CLIENT;
    let dest_ip = ip_from_uri(uri).ok_or_else(|| BootstrapError::InvalidUri(uri.to_string()))?;
    let master = SocketAddrV4::new(dest_ip, ports.tcp_sync_port);
    let span = resolve_ram(ram.as_ref())?;
    let unmap_owners = range_owners(Role::Client, domain_id, local_node_id, &NodeRegistry::new())?;

    let phase = MigrationPhase::new();
    let timer = phase.start_timer(scheduler, precopy)?;

    debug!("Initializing DSM client, master at {master}");
    let handle = match engine
        .open_as_client(span, local_node_id, master)
        .map_err(BootstrapError::from)
        .and_then(validate_handle)
    {
        Ok(handle) => handle,
        Err(err) => {
            phase.cancel_timer(scheduler, &timer);
            return Err(err);
        }
    };
    info!("DSM client is ready");

    Ok(DsmSession::new(
        engine,
        ram,
        handle,
        phase,
        GUEST_PAGE_SIZE,
        SessionParts {
            role: Role::Client,
            domain_id,
            local_node_id,
            nodes: NodeRegistry::new(),
            regions: RegionTable::new(),
            span,
            unmap_owners,
            timer: Some(timer),
        },
    ))
}

/// Opens a master session from a parsed configuration. Regions are laid out back to back
/// from the start of guest RAM.
pub fn open_master(
    engine: Arc<dyn DsmEngine>,
    ram: Arc<dyn GuestRam>,
    config: MasterConfig,
) -> Result<DsmSession, BootstrapError> {
    let span = resolve_ram(ram.as_ref())?;
    let MasterConfig {
        domain_id,
        nodes,
        mut regions,
        page_size,
        ..
    } = config;
    regions.bind_to_ram(span)?;
    open_as_master(engine, ram, domain_id, nodes, regions, span, page_size)
}

/// Opens a client session from a parsed configuration.
pub fn open_client(
    engine: Arc<dyn DsmEngine>,
    ram: Arc<dyn GuestRam>,
    config: ClientConfig,
) -> Result<DsmSession, BootstrapError> {
    let span = resolve_ram(ram.as_ref())?;
    let unmap_owners = range_owners(
        Role::Client,
        config.domain_id,
        config.local_node_id,
        &NodeRegistry::new(),
    )?;
    debug!("Initializing DSM client, master at {}", config.master_sync_addr());
    let handle = validate_handle(engine.open_as_client(
        span,
        config.local_node_id,
        config.master_sync_addr(),
    )?)?;
    info!("DSM client is ready");

    Ok(DsmSession::new(
        engine,
        ram,
        handle,
        MigrationPhase::new(),
        config.page_size,
        SessionParts {
            role: Role::Client,
            domain_id: config.domain_id,
            local_node_id: config.local_node_id,
            nodes: NodeRegistry::new(),
            regions: RegionTable::new(),
            span,
            unmap_owners,
            timer: None,
        },
    ))
}
