// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Largest value accepted for node and domain identifiers.
pub const MAX_ID: u64 = 0xFFFF;

/// Errors associated with node identifiers and the node registry.
#[derive(Debug, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum NodeError {
    /// Invalid node id {0}: node ids must be nonzero and fit in 16 bits
    InvalidNodeId(u64),
    /// Invalid domain id {0}: domain ids must be nonzero and fit in 16 bits
    InvalidDomainId(u64),
    /// Node {0} is already registered in domain {1}
    DuplicateNode(NodeId, DomainId),
    /// Domain {0} already has master node {1}
    DuplicateMaster(DomainId, NodeId),
}

/// Identifier of a node inside a DSM domain. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u16);

impl NodeId {
    /// The master node. Masters always run as node 1.
    pub const MASTER: NodeId = NodeId(1);
    /// The client node of a live migration.
    pub const MIGRATION_CLIENT: NodeId = NodeId(2);

    /// Validates `raw` as a node id.
    pub fn new(raw: u64) -> Result<Self, NodeError> {
        match u16::try_from(raw) {
            Ok(id) if id != 0 => Ok(NodeId(id)),
            _ => Err(NodeError::InvalidNodeId(raw)),
        }
    }

    /// The id as a plain integer.
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a DSM domain (session). Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(u16);

impl DomainId {
    /// Domain used for live migration, which only ever needs one.
    pub const LIVE_MIGRATION: DomainId = DomainId(1);

    /// Validates `raw` as a domain id.
    pub fn new(raw: u64) -> Result<Self, NodeError> {
        match u16::try_from(raw) {
            Ok(id) if id != 0 => Ok(DomainId(id)),
            _ => Err(NodeError::InvalidDomainId(raw)),
        }
    }

    /// The id as a plain integer.
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network location of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeEndpoint {
    /// IPv4 address of the node.
    pub ip: Ipv4Addr,
    /// Port the DSM engine uses for RDMA connection setup.
    pub rdma_port: u16,
    /// TCP port from the node record. Diagnostic only, never passed to the engine.
    pub tcp_port: Option<u16>,
}

impl NodeEndpoint {
    /// Address the engine connects to for RDMA.
    pub fn rdma_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.rdma_port)
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tcp_port {
            Some(tcp_port) => write!(f, "{}:{} (tcp {})", self.ip, self.rdma_port, tcp_port),
            None => write!(f, "{}:{}", self.ip, self.rdma_port),
        }
    }
}

/// One participant of a DSM domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Domain the node belongs to.
    pub domain_id: DomainId,
    /// Id of the node, unique within the domain.
    pub node_id: NodeId,
    /// Where the node can be reached.
    pub endpoint: NodeEndpoint,
    /// Whether the node owns the authoritative copy of memory.
    pub is_master: bool,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ domain: {}, node: {}, endpoint: {}, master: {} }}",
            self.domain_id, self.node_id, self.endpoint, self.is_master
        )
    }
}

/// Ordered set of nodes, keyed by `(domain_id, node_id)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, rejecting duplicate ids and a second master in the same domain.
    pub fn insert(&mut self, node: Node) -> Result<(), NodeError> {
        if self.get(node.domain_id, node.node_id).is_some() {
            return Err(NodeError::DuplicateNode(node.node_id, node.domain_id));
        }
        if node.is_master {
            if let Some(master) = self.master(node.domain_id) {
                return Err(NodeError::DuplicateMaster(node.domain_id, master.node_id));
            }
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Looks up a node.
    pub fn get(&self, domain_id: DomainId, node_id: NodeId) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| node.domain_id == domain_id && node.node_id == node_id)
    }

    /// Whether `node_id` is registered in `domain_id`.
    pub fn contains(&self, domain_id: DomainId, node_id: NodeId) -> bool {
        self.get(domain_id, node_id).is_some()
    }

    /// The master of `domain_id`, if registered.
    pub fn master(&self, domain_id: DomainId) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| node.domain_id == domain_id && node.is_master)
    }

    /// Iterates nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
