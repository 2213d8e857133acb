// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Option strings of the form `dsmid=1,vminfo=1:10.0.0.1:4444:4445#2:...,mr=1:8192:2` are
//! tokenized into [`DsmOptions`] and turned into validated node and region tables by
//! [`ConfigBuilder`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};

use crate::node::{DomainId, Node, NodeEndpoint, NodeError, NodeId, NodeRegistry};
use crate::region::{
    check_region_size, MemoryRegion, OwnerList, RegionError, RegionFlags, RegionTable,
};
use crate::GUEST_PAGE_SIZE;

/// Key of the domain id.
pub const DSMID_KEY: &str = "dsmid";
/// Key of the client's own node id.
pub const VMID_KEY: &str = "vmid";
/// Key of the master's node list.
pub const VMINFO_KEY: &str = "vminfo";
/// Key of the master's region list.
pub const MR_KEY: &str = "mr";
/// Key of the client's master endpoint.
pub const MASTER_KEY: &str = "master";

const RECORD_SEPARATOR: char = '#';
const FIELD_SEPARATOR: char = ':';

/// Errors associated with building a DSM configuration. All of them are fatal.
#[derive(Debug, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum ConfigError {
    /// Missing required option `{0}`
    MissingKey(&'static str),
    /// Option `{0}` is given more than once
    DuplicateKey(String),
    /// Malformed option `{0}`: expected key=value
    MalformedOption(String),
    /// Invalid number `{value}` for `{key}`
    InvalidNumber {
        /// Option or field being parsed.
        key: &'static str,
        /// Offending text.
        value: String,
    },
    /// Invalid IPv4 address `{0}`
    InvalidAddress(String),
    /// Malformed `{key}` record `{record}`
    MalformedRecord {
        /// Option holding the record.
        key: &'static str,
        /// Offending record.
        record: String,
    },
    /// The node list is empty
    EmptyNodeList,
    /// The node list does not contain the local node {0}
    MissingLocalNode(NodeId),
    /// Region {region_id} lists owner {owner} which is not in the node list
    UnknownOwner {
        /// Region being parsed.
        region_id: u32,
        /// Owner missing from the registry.
        owner: NodeId,
    },
    /// Region {region_id} lists owner {owner} more than once
    DuplicateOwner {
        /// Region being parsed.
        region_id: u32,
        /// Repeated owner.
        owner: NodeId,
    },
    /// {0}
    Node(#[from] NodeError),
    /// {0}
    Region(#[from] RegionError),
}

/// Tokenized `key=value` options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DsmOptions {
    pairs: Vec<(String, String)>,
}

impl DsmOptions {
    /// Splits `text` on `,` then each item on its first `=`. Empty items are skipped.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut options = DsmOptions::default();
        for item in text.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedOption(item.to_string()))?;
            options.insert(key.trim(), value.trim())?;
        }
        Ok(options)
    }

    /// Builds options from already tokenized pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self, ConfigError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut options = DsmOptions::default();
        for (key, value) in pairs {
            options.insert(key.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }

    fn insert(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if key.is_empty() {
            return Err(ConfigError::MalformedOption(format!("={value}")));
        }
        if self.get(key).is_some() {
            return Err(ConfigError::DuplicateKey(key.to_string()));
        }
        self.pairs.push((key.to_string(), value.to_string()));
        Ok(())
    }

    /// Value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `key`, or [`ConfigError::MissingKey`].
    pub fn require(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingKey(key))
    }
}

impl FromStr for DsmOptions {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DsmOptions::parse(s)
    }
}

/// Validated configuration of a master node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterConfig {
    /// Domain of the session.
    pub domain_id: DomainId,
    /// Always [`NodeId::MASTER`].
    pub local_node_id: NodeId,
    /// All nodes of the domain.
    pub nodes: NodeRegistry,
    /// Regions, not yet bound to RAM.
    pub regions: RegionTable,
    /// Alignment unit of region sizes and of dirty bitmaps.
    pub page_size: u64,
}

impl fmt::Display for MasterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nodes:")?;
        for node in self.nodes.iter() {
            writeln!(f, "  {node}")?;
        }
        writeln!(f, "regions:")?;
        for region in self.regions.iter() {
            writeln!(f, "  {region}")?;
        }
        Ok(())
    }
}

/// Validated configuration of a client node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Domain of the session.
    pub domain_id: DomainId,
    /// Id of this node.
    pub local_node_id: NodeId,
    /// Address of the master.
    pub master_ip: Ipv4Addr,
    /// RDMA port of the master. Diagnostic only.
    pub master_rdma_port: u16,
    /// TCP sync port of the master, used to connect.
    pub master_tcp_port: u16,
    /// Page size of dirty bitmaps.
    pub page_size: u64,
}

impl ClientConfig {
    /// Address the engine connects to.
    pub fn master_sync_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.master_ip, self.master_tcp_port)
    }
}

impl fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ domain: {}, node: {}, master: {} (rdma {}) }}",
            self.domain_id,
            self.local_node_id,
            self.master_sync_addr(),
            self.master_rdma_port
        )
    }
}

/// Builds node and region tables out of [`DsmOptions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigBuilder {
    page_size: u64,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            page_size: GUEST_PAGE_SIZE,
        }
    }
}

impl ConfigBuilder {
    /// Builder aligning regions to [`GUEST_PAGE_SIZE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the region alignment unit.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Alignment unit of region sizes.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Reads `dsmid`, `vminfo` and `mr`. The local node is always node 1.
    pub fn build_master(&self, options: &DsmOptions) -> Result<MasterConfig, ConfigError> {
        let domain_id = parse_domain_id(options)?;
        let local_node_id = NodeId::MASTER;
        debug!("dsm_id = {domain_id}, local node = {local_node_id}");

        let nodes = parse_node_list(domain_id, options.require(VMINFO_KEY)?)?;
        if !nodes.contains(domain_id, local_node_id) {
            return Err(ConfigError::MissingLocalNode(local_node_id));
        }

        let regions = self.parse_region_list(domain_id, &nodes, options.require(MR_KEY)?)?;
        info!(
            "Parsed master configuration with {} nodes and {} regions",
            nodes.len(),
            regions.len()
        );

        Ok(MasterConfig {
            domain_id,
            local_node_id,
            nodes,
            regions,
            page_size: self.page_size,
        })
    }

    /// Reads `dsmid`, `vmid` and `master`.
    pub fn build_client(&self, options: &DsmOptions) -> Result<ClientConfig, ConfigError> {
        let domain_id = parse_domain_id(options)?;
        let local_node_id = NodeId::new(parse_number(VMID_KEY, options.require(VMID_KEY)?)?)?;
        debug!("dsm_id = {domain_id}, local node = {local_node_id}");

        let master = options.require(MASTER_KEY)?;
        let fields: Vec<&str> = master.split_terminator(FIELD_SEPARATOR).collect();
        let [ip, rdma_port, tcp_port] = fields.as_slice() else {
            return Err(ConfigError::MalformedRecord {
                key: MASTER_KEY,
                record: master.to_string(),
            });
        };
        let config = ClientConfig {
            domain_id,
            local_node_id,
            master_ip: parse_ip(ip)?,
            master_rdma_port: parse_port(rdma_port)?,
            master_tcp_port: parse_port(tcp_port)?,
            page_size: self.page_size,
        };
        debug!("Master endpoint: {config}");
        Ok(config)
    }

    fn parse_region_list(
        &self,
        domain_id: DomainId,
        nodes: &NodeRegistry,
        list: &str,
    ) -> Result<RegionTable, ConfigError> {
        let mut regions = RegionTable::new();
        for record in list.split_terminator(RECORD_SEPARATOR) {
            let region = self.parse_region(domain_id, nodes, record)?;
            debug!("Adding region {region}");
            regions.insert(region)?;
        }
        Ok(regions)
    }

    // `region_id:size[:owner...]`
    fn parse_region(
        &self,
        domain_id: DomainId,
        nodes: &NodeRegistry,
        record: &str,
    ) -> Result<MemoryRegion, ConfigError> {
        let mut fields = record.split_terminator(FIELD_SEPARATOR);
        let (Some(region_id), Some(size)) = (fields.next(), fields.next()) else {
            return Err(ConfigError::MalformedRecord {
                key: MR_KEY,
                record: record.to_string(),
            });
        };
        let region_id = u32::try_from(parse_number(MR_KEY, region_id)?).map_err(|_| {
            ConfigError::InvalidNumber {
                key: MR_KEY,
                value: region_id.to_string(),
            }
        })?;
        let size = parse_number(MR_KEY, size)?;
        check_region_size(region_id, size, self.page_size)?;

        let mut owners = OwnerList::new();
        for owner in fields {
            if owners.is_full() {
                return Err(RegionError::TooManyOwners(region_id).into());
            }
            let owner = NodeId::new(parse_number(MR_KEY, owner)?)?;
            if !nodes.contains(domain_id, owner) {
                return Err(ConfigError::UnknownOwner { region_id, owner });
            }
            if owners.contains(owner) {
                return Err(ConfigError::DuplicateOwner { region_id, owner });
            }
            owners
                .try_push(owner)
                .map_err(|_| RegionError::TooManyOwners(region_id))?;
        }

        Ok(MemoryRegion::new(
            domain_id,
            region_id,
            size,
            self.page_size,
            owners,
            RegionFlags::AUTO_UNMAP,
        )?)
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidNumber {
            key: "port",
            value: value.to_string(),
        })
}

fn parse_ip(value: &str) -> Result<Ipv4Addr, ConfigError> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ConfigError::InvalidAddress(value.to_string()))
}

fn parse_domain_id(options: &DsmOptions) -> Result<DomainId, ConfigError> {
    Ok(DomainId::new(parse_number(
        DSMID_KEY,
        options.require(DSMID_KEY)?,
    )?)?)
}

// `node_id:ip:rdma_port:tcp_port[#...]`
fn parse_node_list(domain_id: DomainId, list: &str) -> Result<NodeRegistry, ConfigError> {
    let mut nodes = NodeRegistry::new();
    for record in list.split_terminator(RECORD_SEPARATOR) {
        let fields: Vec<&str> = record.split_terminator(FIELD_SEPARATOR).collect();
        let [node_id, ip, rdma_port, tcp_port] = fields.as_slice() else {
            return Err(ConfigError::MalformedRecord {
                key: VMINFO_KEY,
                record: record.to_string(),
            });
        };
        let node_id = NodeId::new(parse_number(VMINFO_KEY, node_id)?)?;
        let node = Node {
            domain_id,
            node_id,
            endpoint: NodeEndpoint {
                ip: parse_ip(ip)?,
                rdma_port: parse_port(rdma_port)?,
                tcp_port: Some(parse_port(tcp_port)?),
            },
            is_master: node_id == NodeId::MASTER,
        };
        debug!("Adding node {node}");
        nodes.insert(node)?;
    }
    if nodes.is_empty() {
        return Err(ConfigError::EmptyNodeList);
    }
    Ok(nodes)
}

/// Name of the port file in the user's home directory.
pub const PORTS_FILE_NAME: &str = ".dsm_config";
/// RDMA port used when the port file does not set one.
pub const DEFAULT_RDMA_PORT: u16 = 4444;
/// TCP sync port used when the port file does not set one.
pub const DEFAULT_TCP_SYNC_PORT: u16 = 4445;

/// Ports used by the live-migration bootstrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationPorts {
    /// Port of the RDMA connection manager on every node.
    pub rdma_port: u16,
    /// Port the destination listens on for the client handshake.
    pub tcp_sync_port: u16,
}

impl Default for MigrationPorts {
    fn default() -> Self {
        MigrationPorts {
            rdma_port: DEFAULT_RDMA_PORT,
            tcp_sync_port: DEFAULT_TCP_SYNC_PORT,
        }
    }
}

impl MigrationPorts {
    /// Reads `$HOME/.dsm_config`, falling back to the defaults.
    pub fn load() -> Self {
        match std::env::var_os("HOME") {
            Some(home) => Self::from_path(PathBuf::from(home).join(PORTS_FILE_NAME)),
            None => {
                warn!("HOME is not set, using default migration ports");
                Self::default()
            }
        }
    }

    /// Reads the port file at `path`, falling back to the defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) => {
                debug!(
                    "Could not read {}: {err}, using default migration ports",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Parses `KEY=value` lines. Unknown keys and bad values are ignored with a warning.
    pub fn parse(text: &str) -> Self {
        let mut ports = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("Ignoring malformed port file line `{line}`");
                continue;
            };
            let slot = match key.trim() {
                "RDMA_PORT" => &mut ports.rdma_port,
                "TCP_SYNC_PORT" => &mut ports.tcp_sync_port,
                other => {
                    warn!("Ignoring unknown port file key `{other}`");
                    continue;
                }
            };
            match value.trim().parse::<u16>() {
                Ok(port) if port != 0 => *slot = port,
                _ => warn!(
                    "Couldn't read {}, using default value of {}",
                    key.trim(),
                    slot
                ),
            }
        }
        ports
    }
}

#[cfg(test)]
mod tests {
    use utils::tempfile::TempFile;

    use super::*;
    use crate::region::MAX_REGION_OWNERS;

    const VMINFO: &str = "1:10.0.0.1:4444:4445#2:10.0.0.2:4444:4445#3:10.0.0.3:4444:4445";

    fn master(text: &str) -> Result<MasterConfig, ConfigError> {
        ConfigBuilder::new().build_master(&DsmOptions::parse(text)?)
    }

    fn client(text: &str) -> Result<ClientConfig, ConfigError> {
        ConfigBuilder::new().build_client(&DsmOptions::parse(text)?)
    }

    #[test]
    fn test_options_parse() {
        let options = DsmOptions::parse("dsmid=1, vminfo=1:a=b,,mr=1:4096:2,").unwrap();
        assert_eq!(options.get("dsmid"), Some("1"));
        // Only the first `=` splits.
        assert_eq!(options.get("vminfo"), Some("1:a=b"));
        assert_eq!(options.require("mr").unwrap(), "1:4096:2");
        assert_eq!(options.require("vmid"), Err(ConfigError::MissingKey("vmid")));

        assert_eq!(
            DsmOptions::parse("dsmid=1,dsmid=2"),
            Err(ConfigError::DuplicateKey(String::from("dsmid")))
        );
        assert_eq!(
            DsmOptions::parse("dsmid"),
            Err(ConfigError::MalformedOption(String::from("dsmid")))
        );
        assert!(DsmOptions::parse("=1").is_err());

        let options = DsmOptions::from_pairs([("dsmid", "3"), ("vmid", "2")]).unwrap();
        assert_eq!(options, "dsmid=3,vmid=2".parse::<DsmOptions>().unwrap());
    }

    #[test]
    fn test_build_master() {
        let text = format!("dsmid=7,vminfo={VMINFO}#,mr=1:8192:2:3#2:4096:1#");
        let config = master(&text).unwrap();
        let domain = DomainId::new(7).unwrap();
        assert_eq!(config.domain_id, domain);
        assert_eq!(config.local_node_id, NodeId::MASTER);

        let ids: Vec<u16> = config.nodes.iter().map(|n| n.node_id.raw()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(config.nodes.master(domain).unwrap().node_id, NodeId::MASTER);
        let node = config.nodes.get(domain, NodeId::new(2).unwrap()).unwrap();
        assert_eq!(node.endpoint.rdma_addr().to_string(), "10.0.0.2:4444");
        assert_eq!(node.endpoint.tcp_port, Some(4445));

        assert_eq!(config.regions.len(), 2);
        for region in config.regions.iter() {
            assert!(region.size_bytes > 0);
            assert_eq!(region.size_bytes % GUEST_PAGE_SIZE, 0);
            assert_eq!(region.flags, RegionFlags::AUTO_UNMAP);
            assert_eq!(region.base_address, 0);
        }
        let region = config.regions.get(domain, 1).unwrap();
        assert_eq!(
            region.owners.as_slice(),
            &[NodeId::new(2).unwrap(), NodeId::new(3).unwrap()]
        );
    }

    #[test]
    fn test_master_node_errors() {
        assert_eq!(
            master("vminfo=1:10.0.0.1:1:2,mr=1:4096"),
            Err(ConfigError::MissingKey(DSMID_KEY))
        );
        assert_eq!(
            master("dsmid=0,vminfo=1:10.0.0.1:1:2,mr=1:4096"),
            Err(ConfigError::Node(NodeError::InvalidDomainId(0)))
        );
        assert_eq!(
            master("dsmid=65536,vminfo=1:10.0.0.1:1:2,mr=1:4096"),
            Err(ConfigError::Node(NodeError::InvalidDomainId(65536)))
        );
        assert_eq!(
            master("dsmid=1,vminfo=,mr=1:4096"),
            Err(ConfigError::EmptyNodeList)
        );
        assert_eq!(
            master("dsmid=1,vminfo=2:10.0.0.2:1:2,mr=1:4096"),
            Err(ConfigError::MissingLocalNode(NodeId::MASTER))
        );
        assert_eq!(
            master("dsmid=1,vminfo=1:10.0.0.1:1:2#1:10.0.0.9:1:2,mr=1:4096"),
            Err(ConfigError::Node(NodeError::DuplicateNode(
                NodeId::MASTER,
                DomainId::LIVE_MIGRATION
            )))
        );
        assert_eq!(
            master("dsmid=1,vminfo=1:10.0.0.1:1:2##2:10.0.0.2:1:2,mr=1:4096"),
            Err(ConfigError::MalformedRecord {
                key: VMINFO_KEY,
                record: String::new()
            })
        );
        assert_eq!(
            master("dsmid=1,vminfo=1:10.0.0.1:1,mr=1:4096"),
            Err(ConfigError::MalformedRecord {
                key: VMINFO_KEY,
                record: String::from("1:10.0.0.1:1")
            })
        );
        assert_eq!(
            master("dsmid=1,vminfo=0:10.0.0.1:1:2,mr=1:4096"),
            Err(ConfigError::Node(NodeError::InvalidNodeId(0)))
        );
        assert_eq!(
            master("dsmid=1,vminfo=1:fe80::1:1:2,mr=1:4096"),
            Err(ConfigError::MalformedRecord {
                key: VMINFO_KEY,
                record: String::from("1:fe80::1:1:2")
            })
        );
        assert_eq!(
            master("dsmid=1,vminfo=1:10.0.0.300:1:2,mr=1:4096"),
            Err(ConfigError::InvalidAddress(String::from("10.0.0.300")))
        );
        assert!(matches!(
            master("dsmid=1,vminfo=1:10.0.0.1:70000:2,mr=1:4096"),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_master_region_errors() {
        let base = "dsmid=1,vminfo=1:10.0.0.1:1:2#2:10.0.0.2:1:2";
        assert_eq!(
            master(&format!("{base},mr=1:0:2")),
            Err(ConfigError::Region(RegionError::InvalidSize {
                region_id: 1,
                size: 0,
                page_size: GUEST_PAGE_SIZE
            }))
        );
        // Size is checked before owners are read.
        assert!(matches!(
            master(&format!("{base},mr=1:100:99")),
            Err(ConfigError::Region(RegionError::InvalidSize { .. }))
        ));
        assert_eq!(
            master(&format!("{base},mr=1:4096:3")),
            Err(ConfigError::UnknownOwner {
                region_id: 1,
                owner: NodeId::new(3).unwrap()
            })
        );
        assert_eq!(
            master(&format!("{base},mr=1:4096:2:2:2")),
            Err(ConfigError::DuplicateOwner {
                region_id: 1,
                owner: NodeId::new(2).unwrap()
            })
        );
        assert_eq!(
            master(&format!("{base},mr=1:4096:2#1:8192:2")),
            Err(ConfigError::Region(RegionError::DuplicateRegion(
                DomainId::LIVE_MIGRATION,
                1
            )))
        );
        assert_eq!(
            master(&format!("{base},mr=1:4096:0")),
            Err(ConfigError::Node(NodeError::InvalidNodeId(0)))
        );
        assert_eq!(
            master(&format!("{base},mr=1")),
            Err(ConfigError::MalformedRecord {
                key: MR_KEY,
                record: String::from("1")
            })
        );
        assert_eq!(master(base), Err(ConfigError::MissingKey(MR_KEY)));

        // A different alignment unit.
        let options = DsmOptions::parse(&format!("{base},mr=1:8192:2")).unwrap();
        assert!(ConfigBuilder::new()
            .with_page_size(16384)
            .build_master(&options)
            .is_err());
        let config = ConfigBuilder::new()
            .with_page_size(8192)
            .build_master(&options)
            .unwrap();
        assert_eq!(config.page_size, 8192);
        assert_eq!(master(&format!("{base},mr=1:8192:2")).unwrap().page_size, GUEST_PAGE_SIZE);
    }

    #[test]
    fn test_too_many_owners() {
        let vminfo: Vec<String> = (1..=MAX_REGION_OWNERS + 1)
            .map(|id| format!("{id}:10.0.1.{id}:4444:4445"))
            .collect();
        let owners: Vec<String> = (1..=MAX_REGION_OWNERS + 1)
            .map(|id| id.to_string())
            .collect();

        // Exactly the limit is fine.
        let text = format!(
            "dsmid=1,vminfo={},mr=1:4096:{}",
            vminfo.join("#"),
            owners[..MAX_REGION_OWNERS].join(":")
        );
        let config = master(&text).unwrap();
        let region = config.regions.get(DomainId::LIVE_MIGRATION, 1).unwrap();
        assert_eq!(region.owners.len(), MAX_REGION_OWNERS);

        // One more stops parsing, even with a bad owner after it.
        let text = format!(
            "dsmid=1,vminfo={},mr=1:4096:{}:bogus",
            vminfo.join("#"),
            owners.join(":")
        );
        assert_eq!(
            master(&text),
            Err(ConfigError::Region(RegionError::TooManyOwners(1)))
        );
    }

    #[test]
    fn test_build_client() {
        let config = client("dsmid=1,vmid=2,master=10.0.0.1:4444:4445").unwrap();
        assert_eq!(config.domain_id, DomainId::LIVE_MIGRATION);
        assert_eq!(config.local_node_id, NodeId::MIGRATION_CLIENT);
        assert_eq!(config.master_rdma_port, 4444);
        assert_eq!(
            config.master_sync_addr(),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 4445)
        );
        assert_eq!(
            config.to_string(),
            "{ domain: 1, node: 2, master: 10.0.0.1:4445 (rdma 4444) }"
        );

        assert_eq!(
            client("dsmid=1,master=10.0.0.1:4444:4445"),
            Err(ConfigError::MissingKey(VMID_KEY))
        );
        assert_eq!(
            client("dsmid=1,vmid=0,master=10.0.0.1:4444:4445"),
            Err(ConfigError::Node(NodeError::InvalidNodeId(0)))
        );
        assert_eq!(
            client("dsmid=1,vmid=2,master=10.0.0.1:4444"),
            Err(ConfigError::MalformedRecord {
                key: MASTER_KEY,
                record: String::from("10.0.0.1:4444")
            })
        );
        assert_eq!(
            client("dsmid=1,vmid=2,master=host:4444:4445"),
            Err(ConfigError::InvalidAddress(String::from("host")))
        );
    }

    #[test]
    fn test_ports_parse() {
        assert_eq!(MigrationPorts::parse(""), MigrationPorts::default());
        assert_eq!(
            MigrationPorts::parse("RDMA_PORT=5000\nTCP_SYNC_PORT=5001\n"),
            MigrationPorts {
                rdma_port: 5000,
                tcp_sync_port: 5001
            }
        );
        // Bad values and unknown keys keep the defaults.
        assert_eq!(
            MigrationPorts::parse("# ports\nRDMA_PORT=abc\nFOO=1\nTCP_SYNC_PORT = 6000\ngarbage"),
            MigrationPorts {
                rdma_port: DEFAULT_RDMA_PORT,
                tcp_sync_port: 6000
            }
        );
        assert_eq!(MigrationPorts::parse("RDMA_PORT=0"), MigrationPorts::default());
    }

    #[test]
    fn test_ports_from_path() {
        let file = TempFile::new().unwrap();
        std::fs::write(file.as_path(), b"RDMA_PORT=7000\n").unwrap();
        assert_eq!(
            MigrationPorts::from_path(file.as_path()),
            MigrationPorts {
                rdma_port: 7000,
                tcp_sync_port: DEFAULT_TCP_SYNC_PORT
            }
        );

        let missing = file.as_path().with_extension("missing");
        assert_eq!(
            MigrationPorts::from_path(missing),
            MigrationPorts::default()
        );
    }
}
