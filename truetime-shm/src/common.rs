// Low-level helpers shared by the v1 and v2 reader/writer implementations:
// file descriptor / mmap guards, a safe `clock_gettime` wrapper, and the
// CRC64 primitive used by the v1 checksum protocol.

use std::ffi::{c_void, CStr};
use std::mem::MaybeUninit;
use std::ptr;

use errno::{errno, Errno};

use crate::ShmError;

pub const CLOCK_REALTIME: libc::clockid_t = libc::CLOCK_REALTIME;
#[cfg(target_os = "macos")]
pub const CLOCK_MONOTONIC_RAW: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(target_os = "macos"))]
pub const CLOCK_MONOTONIC_RAW: libc::clockid_t = libc::CLOCK_MONOTONIC_RAW;

/// Convenience macro to build a `ShmError::SyscallError` with extra info from errno and custom
/// origin information.
#[macro_export]
macro_rules! syserror {
    ($origin:expr) => {
        Err($crate::ShmError::SyscallError(
            ::errno::errno(),
            ::std::ffi::CStr::from_bytes_with_nul(concat!($origin, "\0").as_bytes()).unwrap(),
        ))
    };
}

/// Read a specific view of time.
///
/// Wraps `clock_gettime()` to return the current time tracked by a specific clock. `clock_id` is
/// one of `libc::CLOCK_REALTIME`, `libc::CLOCK_MONOTONIC_RAW`, etc. Used by the v2 reader to
/// sample the system clock the daemon pinned its `(phc_time_ns, sysclock_time_ns)` pair against.
pub fn clock_gettime_safe(clock_id: libc::clockid_t) -> Result<libc::timespec, ShmError> {
    let mut buf: MaybeUninit<libc::timespec> = MaybeUninit::uninit();

    // SAFETY: the pointer passed to clock_gettime is valid for a `libc::timespec` write.
    unsafe {
        let ret = libc::clock_gettime(clock_id, buf.as_mut_ptr());
        if ret < 0 {
            syserror!("clock_gettime")
        } else {
            Ok(buf.assume_init())
        }
    }
}

/// A guard tracking an open, read-only file descriptor to the shared memory backing file.
///
/// The descriptor is closed when the guard is dropped. Never unlinks the file: ownership of the
/// backing file belongs to the daemon that publishes it.
pub(crate) struct FdGuard(pub(crate) i32);

impl FdGuard {
    pub(crate) fn open_readonly(path: &CStr) -> Result<Self, ShmError> {
        // SAFETY: `path` is a valid, NUL-terminated C string.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            return syserror!("open");
        }
        Ok(FdGuard(fd))
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        // SAFETY: always safe to close a valid descriptor we opened ourselves.
        unsafe {
            let ret = libc::close(self.0);
            assert!(ret == 0 || errno() == Errno(libc::EINTR));
        }
    }
}

/// A guard tracking a read-only memory mapping of a fixed-size segment.
///
/// The mapping is unmapped when the guard is dropped.
pub(crate) struct MmapGuard {
    pub(crate) addr: *mut c_void,
    pub(crate) len: usize,
}

impl MmapGuard {
    pub(crate) fn map_readonly(fd: &FdGuard, len: usize) -> Result<Self, ShmError> {
        Self::map(fd, len, libc::PROT_READ)
    }

    #[cfg(feature = "writer")]
    pub(crate) fn map_read_write(fd: &FdGuard, len: usize) -> Result<Self, ShmError> {
        Self::map(fd, len, libc::PROT_READ | libc::PROT_WRITE)
    }

    fn map(fd: &FdGuard, len: usize, prot: libc::c_int) -> Result<Self, ShmError> {
        // SAFETY: `fd.0` is a valid, open file descriptor; `len` is caller-validated against the
        // backing file's actual size before this is called.
        let addr = unsafe { libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd.0, 0) };
        if addr == libc::MAP_FAILED {
            return syserror!("mmap SHM segment");
        }
        Ok(MmapGuard { addr, len })
    }
}

impl Drop for MmapGuard {
    fn drop(&mut self) {
        // SAFETY: `addr`/`len` were returned together from a prior successful `mmap`.
        unsafe {
            let ret = libc::munmap(self.addr, self.len);
            assert!(ret == 0);
        }
    }
}

/// File size in bytes, used to validate a segment is large enough before mapping it.
pub(crate) fn file_size(fd: &FdGuard) -> Result<u64, ShmError> {
    // SAFETY: `fd.0` is a valid, open file descriptor.
    let mut st: MaybeUninit<libc::stat> = MaybeUninit::uninit();
    let ret = unsafe { libc::fstat(fd.0, st.as_mut_ptr()) };
    if ret < 0 {
        return syserror!("fstat");
    }
    let st = unsafe { st.assume_init() };
    Ok(st.st_size as u64)
}

/// CRC step function: uses a hardware CRC32C intrinsic when the target was compiled with the
/// relevant feature, and an XOR fold otherwise. The spec only requires writer and reader agree on
/// the same function, not cryptographic strength.
#[inline]
fn crc_step(acc: u64, val: u64) -> u64 {
    #[cfg(all(target_arch = "x86_64", target_feature = "sse4.2"))]
    {
        // SAFETY: gated on the sse4.2 target feature being enabled at compile time.
        unsafe {
            return std::arch::x86_64::_mm_crc32_u64(acc, val);
        }
    }
    #[cfg(all(target_arch = "aarch64", target_feature = "crc"))]
    {
        // SAFETY: gated on the crc target feature being enabled at compile time.
        unsafe {
            return std::arch::aarch64::__crc32cd(acc as u32, val) as u64;
        }
    }
    #[cfg(not(any(
        all(target_arch = "x86_64", target_feature = "sse4.2"),
        all(target_arch = "aarch64", target_feature = "crc")
    )))]
    {
        acc ^ val
    }
}

/// Canonical CRC64 over the three fields that the daemon guarantees to update atomically: seed
/// `0xFFFFFFFF`, fold `ingress_time_ns`, `error_bound_ns`, `holdover_multiplier_ns` in that order,
/// final XOR `0xFFFFFFFF`.
pub fn crc64(ingress_time_ns: i64, error_bound_ns: u32, holdover_multiplier_ns: u32) -> u64 {
    let mut counter = crc_step(0xFFFF_FFFF, ingress_time_ns as u64);
    counter = crc_step(counter, error_bound_ns as u64);
    counter = crc_step(counter, holdover_multiplier_ns as u64);
    counter ^ 0xFFFF_FFFF
}

/// Legacy CRC64 variant kept for interop with daemons still publishing it during a rollout: seed
/// `0x04C11DB7`, same field folding, no final XOR.
pub fn crc64_legacy(ingress_time_ns: i64, error_bound_ns: u32, holdover_multiplier_ns: u32) -> u64 {
    let mut counter = crc_step(0x04C1_1DB7, ingress_time_ns as u64);
    counter = crc_step(counter, error_bound_ns as u64);
    counter = crc_step(counter, holdover_multiplier_ns as u64);
    counter
}

#[cfg(test)]
mod t_common {
    use super::*;
    use std::{thread, time};

    #[test]
    fn clock_gettime_safe_realtime_advances() {
        let one = clock_gettime_safe(CLOCK_REALTIME).expect("clock_gettime failed");
        thread::sleep(time::Duration::from_millis(10));
        let two = clock_gettime_safe(CLOCK_REALTIME).expect("clock_gettime failed");
        let one_ns = one.tv_sec as i128 * 1_000_000_000 + one.tv_nsec as i128;
        let two_ns = two.tv_sec as i128 * 1_000_000_000 + two.tv_nsec as i128;
        assert!(two_ns > one_ns);
    }

    #[test]
    fn crc64_is_deterministic() {
        assert_eq!(crc64(1, 2, 3), crc64(1, 2, 3));
        assert_ne!(crc64(1, 2, 3), crc64(1, 2, 4));
    }

    #[test]
    fn crc64_legacy_differs_from_canonical() {
        // Not a hard requirement, but the two seeds should not collide on common small inputs.
        assert_ne!(crc64(10, 20, 30), crc64_legacy(10, 20, 30));
    }
}
