// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use arrayvec::ArrayVec;

use crate::memory::RamSpan;
use crate::node::{DomainId, NodeId};

/// Maximum number of owners a single region can list.
pub const MAX_REGION_OWNERS: usize = 32;

/// Errors associated with memory regions and the region table.
#[derive(Debug, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum RegionError {
    /// Region {region_id} has invalid size {size}: must be nonzero and a multiple of {page_size}
    InvalidSize {
        /// Region being validated.
        region_id: u32,
        /// Requested size in bytes.
        size: u64,
        /// Alignment unit.
        page_size: u64,
    },
    /// Region {0} lists more than 32 owners
    TooManyOwners(u32),
    /// Region {1} is already defined in domain {0}
    DuplicateRegion(DomainId, u32),
    /// Regions need {needed:#x} bytes but the guest RAM block only has {available:#x}
    ExceedsRam {
        /// Total size of the regions.
        needed: u64,
        /// Size of the RAM span.
        available: u64,
    },
}

bitflags::bitflags! {
    /// Engine behavior requested for a region.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        /// Local pages are dropped once the engine has pushed them to the owners.
        const AUTO_UNMAP = 1 << 0;
        /// Pages are fetched from the owners on first access.
        const COPY_ON_ACCESS = 1 << 1;
    }
}

/// Bounded, ordered list of the nodes holding a region's pages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnerList(ArrayVec<NodeId, MAX_REGION_OWNERS>);

impl OwnerList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an owner. Hands the id back when the list is full.
    pub fn try_push(&mut self, owner: NodeId) -> Result<(), NodeId> {
        self.0.try_push(owner).map_err(|err| err.element())
    }

    /// Whether another owner would overflow the list.
    pub fn is_full(&self) -> bool {
        self.0.is_full()
    }

    /// Whether `owner` is listed.
    pub fn contains(&self, owner: NodeId) -> bool {
        self.0.contains(&owner)
    }

    /// Owners in insertion order.
    pub fn as_slice(&self) -> &[NodeId] {
        self.0.as_slice()
    }

    /// Iterates owners in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter()
    }

    /// Number of owners.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&[NodeId]> for OwnerList {
    type Error = usize;

    /// Fails with the slice length when it does not fit.
    fn try_from(owners: &[NodeId]) -> Result<Self, Self::Error> {
        ArrayVec::try_from(owners)
            .map(OwnerList)
            .map_err(|_| owners.len())
    }
}

impl fmt::Display for OwnerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, owner) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{owner}")?;
        }
        write!(f, "]")
    }
}

/// A range of guest memory managed by the DSM engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Domain the region belongs to.
    pub domain_id: DomainId,
    /// Region id, unique within the domain.
    pub region_id: u32,
    /// Host virtual address of the first byte. Zero until bound to RAM.
    pub base_address: u64,
    /// Length in bytes.
    pub size_bytes: u64,
    /// Nodes holding the region's pages.
    pub owners: OwnerList,
    /// Engine behavior for the region.
    pub flags: RegionFlags,
}

impl MemoryRegion {
    /// Creates an unbound region after checking that `size_bytes` is a nonzero multiple
    /// of `page_size`.
    pub fn new(
        domain_id: DomainId,
        region_id: u32,
        size_bytes: u64,
        page_size: u64,
        owners: OwnerList,
        flags: RegionFlags,
    ) -> Result<Self, RegionError> {
        check_region_size(region_id, size_bytes, page_size)?;
        Ok(MemoryRegion {
            domain_id,
            region_id,
            base_address: 0,
            size_bytes,
            owners,
            flags,
        })
    }

    /// One past the last host address covered by the region.
    pub fn end_address(&self) -> u64 {
        self.base_address.saturating_add(self.size_bytes)
    }
}

/// Checks a region size against the alignment unit.
pub fn check_region_size(region_id: u32, size: u64, page_size: u64) -> Result<(), RegionError> {
    if size == 0 || page_size == 0 || size % page_size != 0 {
        return Err(RegionError::InvalidSize {
            region_id,
            size,
            page_size,
        });
    }
    Ok(())
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ domain: {}, region: {}, base: {:#x}, size: {:#x}, owners: {}, flags: {:?} }}",
            self.domain_id,
            self.region_id,
            self.base_address,
            self.size_bytes,
            self.owners,
            self.flags
        )
    }
}

/// Ordered set of regions, keyed by `(domain_id, region_id)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionTable {
    regions: Vec<MemoryRegion>,
}

impl RegionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a region, rejecting a duplicate `(domain_id, region_id)` pair.
    pub fn insert(&mut self, region: MemoryRegion) -> Result<(), RegionError> {
        if self.get(region.domain_id, region.region_id).is_some() {
            return Err(RegionError::DuplicateRegion(
                region.domain_id,
                region.region_id,
            ));
        }
        self.regions.push(region);
        Ok(())
    }

    /// Looks up a region.
    pub fn get(&self, domain_id: DomainId, region_id: u32) -> Option<&MemoryRegion> {
        self.regions
            .iter()
            .find(|region| region.domain_id == domain_id && region.region_id == region_id)
    }

    /// Iterates regions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Sum of all region sizes.
    pub fn total_size(&self) -> u64 {
        self.regions
            .iter()
            .fold(0u64, |acc, region| acc.saturating_add(region.size_bytes))
    }

    /// Lays the regions back to back from the start of `span`, in insertion order.
    ///
    /// Leaves the table untouched when the regions do not fit.
    pub fn bind_to_ram(&mut self, span: RamSpan) -> Result<(), RegionError> {
        let needed = self.total_size();
        if needed > span.size {
            return Err(RegionError::ExceedsRam {
                needed,
                available: span.size,
            });
        }

        let mut next = span.host_addr;
        for region in self.regions.iter_mut() {
            region.base_address = next;
            next += region.size_bytes;
        }
        Ok(())
    }
}
