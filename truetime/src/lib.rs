// Copyright TrueTime Authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A client-side TrueTime library: reads a PTP daemon's shared-memory clock data, samples a PTP
//! Hardware Clock, and assembles a `[earliest, latest]` nanosecond interval guaranteed (under the
//! daemon's correctness model) to bracket the true instant of the call.
//!
//! This crate never talks to the network and never writes to hardware; it only consumes what
//! [`truetime_shm`] and [`truetime_phc`] expose.

pub mod client;
pub mod smear;
pub mod wou;

pub use client::{TimeStandard, TrueTimeClient};

use std::fmt;

/// A `[earliest, latest]` nanosecond interval guaranteed to bracket the true instant of the call,
/// in whichever time standard was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrueTime {
    pub earliest_ns: u64,
    pub latest_ns: u64,
}

/// Errors surfaced by [`TrueTimeClient`], matching the published error taxonomy.
#[derive(Debug)]
pub enum TrueTimeError {
    /// Cannot open the shared-memory file — daemon likely not running.
    ShmemOpen(truetime_shm::ShmError),
    /// Mapping the opened shared-memory file failed.
    ShmemMapFailed(truetime_shm::ShmError),
    /// Cannot open the PHC device.
    PtpOpen(truetime_phc::PhcError),
    /// The PHC ioctl failed, or reported a negative sampling delay.
    PtpReadOffset(truetime_phc::PhcError),
    /// Payload present but all fields are zero — daemon has not published yet.
    NoData,
    /// The daemon marked uncertainty unrepresentable (`u32::MAX` sentinel).
    WouTooBig,
    /// The PHC sample precedes the last published ingress time.
    PhcInThePast,
    /// Retries were exhausted without observing a coherent snapshot.
    CrcMismatch,
}

impl TrueTimeError {
    /// Stable, human-readable name for this error kind. Callers should match on the enum variant,
    /// not this string.
    pub fn strerror(&self) -> &'static str {
        match self {
            TrueTimeError::ShmemOpen(_) => "SHMEM_OPEN",
            TrueTimeError::ShmemMapFailed(_) => "SHMEM_MAP_FAILED",
            TrueTimeError::PtpOpen(_) => "PTP_OPEN",
            TrueTimeError::PtpReadOffset(_) => "PTP_READ_OFFSET",
            TrueTimeError::NoData => "NO_DATA",
            TrueTimeError::WouTooBig => "WOU_TOO_BIG",
            TrueTimeError::PhcInThePast => "PHC_IN_THE_PAST",
            TrueTimeError::CrcMismatch => "CRC_MISMATCH",
        }
    }
}

impl fmt::Display for TrueTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.strerror())
    }
}

impl std::error::Error for TrueTimeError {}
