// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::iter::FusedIterator;

use utils::usize_to_u64;

/// Bit of a dirty bitmap byte marking the page as dirty.
pub const DIRTY_FLAG: u8 = 0x08;

/// Contiguous run of dirty pages, in bytes from the start of guest RAM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyRange {
    /// Byte offset of the first dirty page.
    pub offset: u64,
    /// Length of the run in bytes.
    pub len: u64,
}

/// Iterator over the dirty runs of a bitmap with one byte per page.
///
/// Created by [`dirty_ranges`].
#[derive(Debug, Clone)]
pub struct DirtyRanges<'a> {
    bitmap: &'a [u8],
    page_size: u64,
    next_page: usize,
}

/// Reduces `bitmap` to the runs of pages whose byte has [`DIRTY_FLAG`] set.
///
/// Runs are produced in ascending order and never touch each other.
pub fn dirty_ranges(bitmap: &[u8], page_size: u64) -> DirtyRanges<'_> {
    DirtyRanges {
        bitmap,
        page_size,
        next_page: 0,
    }
}

fn is_dirty(byte: u8) -> bool {
    byte & DIRTY_FLAG != 0
}

impl Iterator for DirtyRanges<'_> {
    type Item = DirtyRange;

    fn next(&mut self) -> Option<DirtyRange> {
        let rest = self.bitmap.get(self.next_page..)?;
        let start = self.next_page + rest.iter().position(|b| is_dirty(*b))?;
        let pages = self.bitmap[start..]
            .iter()
            .take_while(|b| is_dirty(**b))
            .count();
        // Skip the clean page that closed the run as well.
        self.next_page = start + pages + 1;

        Some(DirtyRange {
            offset: usize_to_u64(start) * self.page_size,
            len: usize_to_u64(pages) * self.page_size,
        })
    }
}

impl FusedIterator for DirtyRanges<'_> {}
