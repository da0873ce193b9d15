// Copyright TrueTime Authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire layouts and lock-free reader/writer for the shared-memory segment a PTP daemon publishes
//! `ClockData` through. Two segment versions are supported side by side: v1 (CRC64-checksummed)
//! and v2 (seqlock). This crate only knows how to parse bytes; turning a snapshot into a
//! `[earliest, latest]` interval is `truetime`'s job.

use std::ffi::CStr;

use errno::Errno;

pub mod common;
pub mod layout;
mod reader;
#[cfg(feature = "writer")]
mod writer;

pub use layout::{ClockDataV1, ClockDataV2, SMEAR_DURATION_V2_S};
pub use reader::{ShmReaderV1, ShmReaderV2};
#[cfg(feature = "writer")]
pub use writer::{ShmWrite, ShmWriterV1, ShmWriterV2};

/// Errors surfaced while opening or reading a shared-memory segment.
#[derive(Debug)]
pub enum ShmError {
    /// A syscall (`open`, `mmap`, `fstat`, `ftruncate`, ...) failed; carries the observed `errno`
    /// and a short static description of which call failed.
    SyscallError(Errno, &'static CStr),
    /// The segment is smaller than the frame layout it is supposed to hold.
    SegmentMalformed,
    /// The retry budget was exhausted without observing a consistent snapshot.
    CrcMismatch,
}

impl From<ShmError> for std::io::Error {
    fn from(err: ShmError) -> Self {
        match err {
            ShmError::SyscallError(errno, origin) => std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{}: {}", origin.to_string_lossy(), errno),
            ),
            ShmError::SegmentMalformed => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "shm segment malformed")
            }
            ShmError::CrcMismatch => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "shm read retries exhausted")
            }
        }
    }
}
