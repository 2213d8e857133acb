// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use vm_memory::{
    Bytes, GuestAddress, GuestMemory, GuestMemoryError, GuestMemoryMmap, GuestMemoryRegion,
    MemoryRegionAddress,
};

use utils::usize_to_u64;

/// Host mapping of the guest RAM block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RamSpan {
    /// Host virtual address of the first byte.
    pub host_addr: u64,
    /// Length in bytes.
    pub size: u64,
}

impl RamSpan {
    /// Whether `[offset, offset + len)` lies within the span.
    pub fn contains_range(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size)
    }
}

/// Errors associated with guest RAM access.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum GuestRamError {
    /// Offset {0:#x} is outside the guest RAM block
    OutOfRange(u64),
    /// Guest RAM has no block starting at address 0
    NoRamBlock,
    /// Failed to read guest RAM: {0}
    Read(#[from] GuestMemoryError),
}

/// Provider of the local guest RAM block.
pub trait GuestRam: Send + Sync {
    /// Host span of the RAM block, if there is one.
    fn ram_span(&self) -> Option<RamSpan>;

    /// Reads one word at `offset` bytes into the RAM block, faulting the page in.
    fn touch(&self, offset: u64) -> Result<(), GuestRamError>;
}

/// The RAM block is the region mapped at guest address 0.
impl GuestRam for GuestMemoryMmap {
    fn ram_span(&self) -> Option<RamSpan> {
        let region = self.find_region(GuestAddress(0))?;
        let host_addr = region.get_host_address(MemoryRegionAddress(0)).ok()?;
        Some(RamSpan {
            host_addr: usize_to_u64(host_addr as usize),
            size: region.len(),
        })
    }

    fn touch(&self, offset: u64) -> Result<(), GuestRamError> {
        let region = self
            .find_region(GuestAddress(0))
            .ok_or(GuestRamError::NoRamBlock)?;
        if offset >= region.len() {
            return Err(GuestRamError::OutOfRange(offset));
        }
        self.read_obj::<u64>(GuestAddress(offset))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_span() {
        let mem = GuestMemoryMmap::from_ranges(&[(GuestAddress(0), 0x4000)]).unwrap();
        let span = mem.ram_span().unwrap();
        assert_eq!(span.size, 0x4000);
        assert_ne!(span.host_addr, 0);
        assert!(span.contains_range(0x1000, 0x3000));
        assert!(!span.contains_range(0x1000, 0x3001));
        assert!(!span.contains_range(u64::MAX, 2));

        // No block at guest address 0.
        let mem = GuestMemoryMmap::from_ranges(&[(GuestAddress(0x10_0000), 0x4000)]).unwrap();
        assert!(mem.ram_span().is_none());
        assert!(matches!(mem.touch(0), Err(GuestRamError::NoRamBlock)));
    }

    #[test]
    fn test_touch() {
        let mem = GuestMemoryMmap::from_ranges(&[(GuestAddress(0), 0x2000)]).unwrap();
        mem.touch(0).unwrap();
        mem.touch(0x1000).unwrap();
        assert!(matches!(
            mem.touch(0x2000),
            Err(GuestRamError::OutOfRange(0x2000))
        ));
    }
}
