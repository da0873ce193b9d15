// Writer-side implementations of the v1 and v2 protocols. Gated behind the `writer` feature:
// production callers only ever read a daemon-published segment, but tests and local simulation
// need a way to publish one.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::Ordering;

use crate::common::{file_size, crc64, FdGuard, MmapGuard};
use crate::layout::{ClockDataV1, ClockDataV2, FrameV1, FrameV2};
use crate::ShmError;

/// Common behavior of a versioned shared-memory writer: publish a new payload.
pub trait ShmWrite<T> {
    fn write(&mut self, data: &T);
}

fn create_and_size(path: &Path, len: usize) -> Result<FdGuard, ShmError> {
    let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| ShmError::SegmentMalformed)?;
    // SAFETY: `cpath` is a valid, NUL-terminated C string.
    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            0o600,
        )
    };
    if fd < 0 {
        return crate::syserror!("open (writer)");
    }
    let guard = FdGuard(fd);
    // SAFETY: `fd` is freshly opened and owned by `guard`.
    let ret = unsafe { libc::ftruncate(fd, len as libc::off_t) };
    if ret < 0 {
        return crate::syserror!("ftruncate");
    }
    let _ = file_size(&guard)?;
    Ok(guard)
}

/// Writer for a v1 (CRC-checksummed) frame.
pub struct ShmWriterV1 {
    _guard: MmapGuard,
    _fd: FdGuard,
    frame: *mut FrameV1,
}

impl ShmWriterV1 {
    pub fn create(path: &Path) -> Result<Self, ShmError> {
        let fd = create_and_size(path, std::mem::size_of::<FrameV1>())?;
        let guard = MmapGuard::map_read_write(&fd, std::mem::size_of::<FrameV1>())?;
        let frame = guard.addr as *mut FrameV1;
        Ok(ShmWriterV1 {
            _guard: guard,
            _fd: fd,
            frame,
        })
    }
}

impl ShmWrite<ClockDataV1> for ShmWriterV1 {
    fn write(&mut self, data: &ClockDataV1) {
        // SAFETY: `frame` points into a read-write mapping sized for `FrameV1`, owned by `self`.
        unsafe {
            let checksum = crc64(data.ingress_time_ns, data.error_bound_ns, data.holdover_multiplier_ns);
            (&mut (*self.frame).data as *mut ClockDataV1).write_volatile(*data);
            (*self.frame).checksum.store(checksum, Ordering::Release);
        }
    }
}

/// Writer for a v2 (seqlock) frame.
pub struct ShmWriterV2 {
    _guard: MmapGuard,
    _fd: FdGuard,
    frame: *mut FrameV2,
    next_seq: u64,
}

impl ShmWriterV2 {
    pub fn create(path: &Path) -> Result<Self, ShmError> {
        let fd = create_and_size(path, std::mem::size_of::<FrameV2>())?;
        let guard = MmapGuard::map_read_write(&fd, std::mem::size_of::<FrameV2>())?;
        let frame = guard.addr as *mut FrameV2;
        Ok(ShmWriterV2 {
            _guard: guard,
            _fd: fd,
            frame,
            next_seq: 2,
        })
    }
}

impl ShmWrite<ClockDataV2> for ShmWriterV2 {
    fn write(&mut self, data: &ClockDataV2) {
        // Sequence 0 is reserved for "never written"; skip it on wraparound.
        if self.next_seq == 0 {
            self.next_seq = 2;
        }
        let seq = self.next_seq;
        // SAFETY: `frame` points into a read-write mapping sized for `FrameV2`, owned by `self`.
        unsafe {
            (*self.frame).seq.store(seq - 1, Ordering::SeqCst);
            (&mut (*self.frame).data as *mut ClockDataV2).write_volatile(*data);
            (*self.frame).seq.store(seq, Ordering::SeqCst);
        }
        self.next_seq = seq.wrapping_add(2);
    }
}
