// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the DSM library and the `dsmctl` tool.

pub use vmm_sys_util::tempfile;

pub mod arg_parser;
pub mod time;

/// Safely converts a usize value to a u64 value.
/// This bypasses the Clippy lint check because we only support 64-bit platforms.
#[cfg(target_pointer_width = "64")]
#[inline]
pub const fn usize_to_u64(num: usize) -> u64 {
    num as u64
}
