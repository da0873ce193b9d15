// Copyright TrueTime Authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sampling of a PTP Hardware Clock (PHC) through the Linux `ptp_clock` ioctl interface.
//!
//! The kernel exposes two ways to correlate a PHC reading with the system clock: the "extended"
//! `PTP_SYS_OFFSET_EXTENDED` ioctl, which brackets each PHC read with a `(sys_before, sys_after)`
//! pair per sample, and the older "basic" `PTP_SYS_OFFSET`, which interleaves `n+1` system
//! timestamps around `n` PHC timestamps. `PhcSampler` probes for extended support once at
//! construction and commits to whichever the device supports for its lifetime.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use errno::{errno, Errno};
use nix::ioctl_readwrite;

/// Maximum number of (sys, phc) sample pairs the kernel ABI allows per ioctl call.
pub const PTP_MAX_SAMPLES: usize = 25;

const PTP_CLOCK_MAGIC: u8 = b'=';

/// Mirrors `struct ptp_clock_time` from `linux/ptp_clock.h`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct PtpClockTime {
    pub sec: i64,
    pub nsec: u32,
    pub reserved: u32,
}

impl PtpClockTime {
    fn as_nanos(&self) -> i64 {
        self.sec * 1_000_000_000 + self.nsec as i64
    }
}

/// Mirrors `struct ptp_sys_offset`.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct PtpSysOffset {
    pub n_samples: u32,
    pub rsv: [u32; 3],
    pub ts: [PtpClockTime; 2 * PTP_MAX_SAMPLES + 1],
}

/// Mirrors `struct ptp_sys_offset_extended`.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct PtpSysOffsetExtended {
    pub n_samples: u32,
    pub rsv: [u32; 3],
    pub ts: [[PtpClockTime; 3]; PTP_MAX_SAMPLES],
}

impl Default for PtpSysOffset {
    fn default() -> Self {
        PtpSysOffset {
            n_samples: 1,
            rsv: [0; 3],
            ts: [PtpClockTime::default(); 2 * PTP_MAX_SAMPLES + 1],
        }
    }
}

impl Default for PtpSysOffsetExtended {
    fn default() -> Self {
        PtpSysOffsetExtended {
            n_samples: 1,
            rsv: [0; 3],
            ts: [[PtpClockTime::default(); 3]; PTP_MAX_SAMPLES],
        }
    }
}

ioctl_readwrite!(ptp_sys_offset_ioctl, PTP_CLOCK_MAGIC, 5, PtpSysOffset);
ioctl_readwrite!(
    ptp_sys_offset_extended_ioctl,
    PTP_CLOCK_MAGIC,
    9,
    PtpSysOffsetExtended
);

/// Errors raised while opening or reading a PHC device.
#[derive(Debug)]
pub enum PhcError {
    Open(Errno),
    ReadOffset(Errno),
    /// The kernel reported a negative (sys_after - sys_before) bracket, which cannot happen on a
    /// monotonic clock and indicates the measurement cannot be trusted.
    NegativeDelay,
}

/// Abstraction over "a thing that answers PTP_SYS_OFFSET[_EXTENDED] ioctls", so `PhcSampler`'s
/// retry/selection logic can be tested without a real PHC device.
#[cfg_attr(any(test, feature = "test"), mockall::automock)]
pub trait PtpDevice {
    fn sys_offset_extended(&self, n_samples: u32) -> Result<PtpSysOffsetExtended, PhcError>;
    fn sys_offset_basic(&self, n_samples: u32) -> Result<PtpSysOffset, PhcError>;
}

/// A real PHC device opened from `/dev/ptpN`.
pub struct PhcHandle {
    fd: i32,
}

impl PhcHandle {
    pub fn open(path: &Path) -> Result<Self, PhcError> {
        let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| PhcError::Open(errno()))?;
        // SAFETY: `cpath` is a valid, NUL-terminated C string; O_RDONLY is sufficient for the
        // offset ioctls this handle issues.
        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            return Err(PhcError::Open(errno()));
        }
        Ok(PhcHandle { fd })
    }
}

impl Drop for PhcHandle {
    fn drop(&mut self) {
        // SAFETY: `fd` was opened by this handle and is not shared.
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl PtpDevice for PhcHandle {
    fn sys_offset_extended(&self, n_samples: u32) -> Result<PtpSysOffsetExtended, PhcError> {
        let mut arg = PtpSysOffsetExtended {
            n_samples,
            ..Default::default()
        };
        // SAFETY: `fd` is a valid, open PTP device descriptor; `arg` is sized per the ioctl ABI.
        unsafe { ptp_sys_offset_extended_ioctl(self.fd, &mut arg) }
            .map_err(|e| PhcError::ReadOffset(Errno(e as i32)))?;
        Ok(arg)
    }

    fn sys_offset_basic(&self, n_samples: u32) -> Result<PtpSysOffset, PhcError> {
        let mut arg = PtpSysOffset {
            n_samples,
            ..Default::default()
        };
        // SAFETY: `fd` is a valid, open PTP device descriptor; `arg` is sized per the ioctl ABI.
        unsafe { ptp_sys_offset_ioctl(self.fd, &mut arg) }
            .map_err(|e| PhcError::ReadOffset(Errno(e as i32)))?;
        Ok(arg)
    }
}

/// Which ioctl a `PhcSampler` settled on after probing the device once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMethod {
    Extended,
    Basic,
}

/// A single correlated PHC reading: the PHC timestamp and the (sys_after - sys_before) delay
/// bracketing it, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhcSample {
    pub phc_time_ns: i64,
    pub delay_ns: i64,
    /// Smallest delay observed by this sampler across its whole lifetime, including this sample.
    /// Mirrors the PHC client's practice of tracking a monotonically improving delay bound rather
    /// than trusting any single reading.
    pub min_delay_ns: i64,
}

/// Samples a PHC device, auto-selecting between the extended and basic ioctl at construction and
/// tracking the best (smallest) delay bound ever observed.
pub struct PhcSampler<D: PtpDevice> {
    device: D,
    method: SampleMethod,
    min_delay_ns: i64,
}

impl PhcSampler<PhcHandle> {
    pub fn open(path: &Path) -> Result<Self, PhcError> {
        let handle = PhcHandle::open(path)?;
        Ok(Self::new(handle))
    }
}

impl<D: PtpDevice> PhcSampler<D> {
    /// Probes `device` for extended-offset support, preferring it when available.
    pub fn new(device: D) -> Self {
        let method = match device.sys_offset_extended(1) {
            Ok(_) => SampleMethod::Extended,
            Err(_) => SampleMethod::Basic,
        };
        PhcSampler {
            device,
            method,
            min_delay_ns: i64::MAX,
        }
    }

    pub fn method(&self) -> SampleMethod {
        self.method
    }

    /// Take one PHC reading, updating and returning the running minimum delay.
    pub fn sample(&mut self) -> Result<PhcSample, PhcError> {
        let (phc_time_ns, delay_ns) = match self.method {
            SampleMethod::Extended => self.sample_extended()?,
            SampleMethod::Basic => self.sample_basic()?,
        };
        if delay_ns < 0 {
            return Err(PhcError::NegativeDelay);
        }
        if delay_ns < self.min_delay_ns {
            self.min_delay_ns = delay_ns;
        }
        Ok(PhcSample {
            phc_time_ns,
            delay_ns,
            min_delay_ns: self.min_delay_ns,
        })
    }

    fn sample_extended(&self) -> Result<(i64, i64), PhcError> {
        let arg = self.device.sys_offset_extended(1)?;
        let mut min_delay = i64::MAX;
        let n = arg.n_samples as usize;
        for sample in arg.ts.iter().take(n) {
            let delay = sample[2].as_nanos() - sample[0].as_nanos();
            min_delay = min_delay.min(delay);
        }
        let phc_time_ns = arg.ts[n - 1][1].as_nanos();
        Ok((phc_time_ns, min_delay))
    }

    fn sample_basic(&self) -> Result<(i64, i64), PhcError> {
        let arg = self.device.sys_offset_basic(1)?;
        let mut min_delay = i64::MAX;
        let mut last_phc_ns = 0;
        for i in 0..arg.n_samples as usize {
            let delay = arg.ts[2 * i + 2].as_nanos() - arg.ts[2 * i].as_nanos();
            min_delay = min_delay.min(delay);
            last_phc_ns = arg.ts[2 * i + 1].as_nanos();
        }
        Ok((last_phc_ns, min_delay))
    }
}
