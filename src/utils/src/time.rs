// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Constant to convert seconds to nanoseconds.
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
/// Constant to convert milliseconds to nanoseconds.
pub const NANOS_PER_MILLISECOND: u64 = 1_000_000;

/// Wrapper over `libc::clockid_t` to specify Linux Kernel clock source.
#[derive(Clone, Copy, Debug)]
pub enum ClockType {
    /// Equivalent to `libc::CLOCK_MONOTONIC`.
    Monotonic,
    /// Equivalent to `libc::CLOCK_REALTIME`.
    Real,
}

impl From<ClockType> for libc::clockid_t {
    fn from(clock_type: ClockType) -> Self {
        match clock_type {
            ClockType::Monotonic => libc::CLOCK_MONOTONIC,
            ClockType::Real => libc::CLOCK_REALTIME,
        }
    }
}

/// Local wall-clock time with nanosecond precision, used to stamp log lines.
#[derive(Debug)]
pub struct LocalTime {
    sec: i32,
    min: i32,
    hour: i32,
    mday: i32,
    mon: i32,
    /// Years since 1900.
    year: i32,
    nsec: i64,
}

impl LocalTime {
    /// Returns the [LocalTime](struct.LocalTime.html) structure for the calling moment.
    pub fn now() -> LocalTime {
        let mut timespec = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `tm` is plain old data; an all-zero value is valid and fully overwritten
        // by `localtime_r` below.
        let mut tm: libc::tm = unsafe { std::mem::zeroed() };

        // SAFETY: Safe because the parameters are valid.
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut timespec);
            libc::localtime_r(&timespec.tv_sec, &mut tm);
        }

        LocalTime {
            sec: tm.tm_sec,
            min: tm.tm_min,
            hour: tm.tm_hour,
            mday: tm.tm_mday,
            mon: tm.tm_mon,
            year: tm.tm_year,
            nsec: timespec.tv_nsec,
        }
    }
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}",
            self.year + 1900,
            self.mon + 1,
            self.mday,
            self.hour,
            self.min,
            self.sec,
            self.nsec
        )
    }
}

/// Returns a timestamp in nanoseconds based on the provided clock type.
pub fn get_time_ns(clock_type: ClockType) -> u64 {
    let mut time_struct = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: Safe because the parameters are valid.
    unsafe { libc::clock_gettime(clock_type.into(), &mut time_struct) };
    u64::try_from(time_struct.tv_sec).unwrap_or(0) * NANOS_PER_SECOND
        + u64::try_from(time_struct.tv_nsec).unwrap_or(0)
}

/// Returns a timestamp in milliseconds based on the provided clock type.
pub fn get_time_ms(clock_type: ClockType) -> u64 {
    get_time_ns(clock_type) / NANOS_PER_MILLISECOND
}
